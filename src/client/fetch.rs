//! Decoding of artifact fetch responses.
//!
//! A fetch answers with a multipart body whose `artifactProps` part carries
//! the artifact metadata. The rest of the body takes one of three shapes:
//!
//! | Shape           | Parts                                    |
//! |-----------------|------------------------------------------|
//! | `http-response` | `payload` holding a framed HTTP response |
//! | `resource`      | `httpStatus`?, `httpHeaders`, `payload`  |
//! | `headers-only`  | `httpStatus`?, `httpHeaders`             |
//!
//! The shape is named by `X-Artifact-Data-Type` when present and inferred
//! from the parts otherwise. All shapes normalize to one [`ArtifactData`].

use chrono::{DateTime, Utc};
use repo_protocol::http::decode_response;
use repo_protocol::multipart::{self, boundary_from_content_type};
use repo_protocol::{
    parts, shapes, Artifact, Headers, Part, StatusLine, HEADER_ARTIFACT_DATA_TYPE,
    HEADER_CONTENT_INCLUDED,
};
use serde::Deserialize;

use super::transport::HttpResponse;
use crate::data::{ArtifactData, ContentStream};
use crate::error::{RepoError, RepoResult};

/// Wire shape of a fetch response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataShape {
    HttpResponse,
    Resource,
    HeadersOnly,
}

impl DataShape {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            shapes::HTTP_RESPONSE => Some(DataShape::HttpResponse),
            shapes::RESOURCE => Some(DataShape::Resource),
            shapes::HEADERS_ONLY => Some(DataShape::HeadersOnly),
            _ => None,
        }
    }

    pub fn has_content(&self) -> bool {
        !matches!(self, DataShape::HeadersOnly)
    }

    fn infer(payload: Option<&Part>) -> Self {
        match payload {
            None => DataShape::HeadersOnly,
            Some(part) if is_framed(part) => DataShape::HttpResponse,
            Some(_) => DataShape::Resource,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactProps {
    #[serde(flatten)]
    artifact: Artifact,
    #[serde(default)]
    store_date: Option<DateTime<Utc>>,
}

/// Decode a successful fetch response into artifact data.
pub(crate) fn decode_artifact_response(response: HttpResponse) -> RepoResult<ArtifactData> {
    let boundary = response
        .content_type()
        .and_then(boundary_from_content_type)
        .ok_or_else(|| {
            RepoError::Protocol(format!(
                "expected multipart response, got {}",
                response.content_type().unwrap_or("no content type")
            ))
        })?;
    let declared_shape = match response.headers.get(HEADER_ARTIFACT_DATA_TYPE) {
        Some(value) => Some(
            DataShape::parse(value)
                .ok_or_else(|| RepoError::Protocol(format!("unknown artifact data type: {value}")))?,
        ),
        None => None,
    };
    let content_included = match response.headers.get(HEADER_CONTENT_INCLUDED) {
        Some(value) => Some(value.trim().parse::<bool>().map_err(|_| {
            RepoError::Protocol(format!("invalid {HEADER_CONTENT_INCLUDED}: {value}"))
        })?),
        None => None,
    };

    let body = response.read_bytes()?;
    let parts = multipart::parse(&body, &boundary)?;
    decode_parts(&parts, declared_shape, content_included)
}

fn decode_parts(
    parts: &[Part],
    declared_shape: Option<DataShape>,
    content_included: Option<bool>,
) -> RepoResult<ArtifactData> {
    let find = |name: &str| parts.iter().find(|p| p.name == name);

    let props = find(parts::ARTIFACT_PROPS)
        .ok_or_else(|| RepoError::Protocol("response has no artifactProps part".to_string()))?;
    let props: ArtifactProps = serde_json::from_slice(&props.body)?;

    let payload = find(parts::PAYLOAD);
    let shape = declared_shape.unwrap_or_else(|| DataShape::infer(payload));
    if shape.has_content() != payload.is_some() {
        return Err(RepoError::Protocol(format!(
            "{shape:?} response {} a payload part",
            if payload.is_some() { "carries" } else { "lacks" }
        )));
    }
    if let Some(included) = content_included {
        if included != shape.has_content() {
            return Err(RepoError::Protocol(format!(
                "{HEADER_CONTENT_INCLUDED}: {included} contradicts {shape:?} response"
            )));
        }
    }

    let (http_status, headers, content) = match (shape, payload) {
        (DataShape::HttpResponse, Some(part)) => {
            let (status, headers, bytes) = decode_response(&part.body)?;
            (Some(status), headers, Some(ContentStream::from_bytes(bytes.to_vec())))
        }
        (_, payload) => {
            let status = match find(parts::HTTP_STATUS) {
                Some(part) => Some(part.body_str()?.parse::<StatusLine>()?),
                None => None,
            };
            let headers = match find(parts::HTTP_HEADERS) {
                Some(part) => Headers::parse_lines(part.body_str()?)?,
                None => {
                    return Err(RepoError::Protocol(
                        "response has no httpHeaders part".to_string(),
                    ))
                }
            };
            let content = payload.map(|p| ContentStream::from_bytes(p.body.clone()));
            (status, headers, content)
        }
    };

    let data = ArtifactData::from_artifact(&props.artifact, http_status, headers, content);
    Ok(match props.store_date {
        Some(date) => data.with_store_date(date),
        None => data,
    })
}

fn is_framed(part: &Part) -> bool {
    part.content_type()
        .is_some_and(|ct| ct.trim_start().starts_with("application/http"))
}

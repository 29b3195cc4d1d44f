//! Render parameter extraction from JSON or urlencoded bodies.

use axum::{
    Form, Json,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};

use crate::{application::error::HttpError, domain::params::RenderForm};

const SOURCE: &str = "infra::http::form::RenderRequest";

/// Raw render parameters, accepted from either body encoding.
#[derive(Debug)]
pub struct RenderRequest(pub RenderForm);

impl<S> FromRequest<S> for RenderRequest
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().starts_with("application/json"));

        if is_json {
            let Json(form) = Json::<RenderForm>::from_request(req, state)
                .await
                .map_err(|rejection| {
                    HttpError::new(
                        SOURCE,
                        rejection.status(),
                        "Invalid request body",
                        rejection.body_text(),
                    )
                })?;
            Ok(Self(form))
        } else {
            let Form(form) = Form::<RenderForm>::from_request(req, state)
                .await
                .map_err(|rejection| {
                    HttpError::new(
                        SOURCE,
                        rejection.status(),
                        "Invalid request body",
                        rejection.body_text(),
                    )
                })?;
            Ok(Self(form))
        }
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::dto::{HealthResponse, RunMacroRequest, RunMacroResponse};
use super::error::ApiError;
use crate::service::MacroService;

pub const XLSM_CONTENT_TYPE: &str = "application/vnd.ms-excel.sheet.macroEnabled.12";

pub async fn run_macro(
    State(svc): State<Arc<MacroService>>,
    payload: Result<Json<RunMacroRequest>, JsonRejection>,
) -> Result<Json<RunMacroResponse>, ApiError> {
    let Json(req) = payload?;
    let value = svc
        .run_by_path(PathBuf::from(req.file_path), req.macro_name)
        .await?;
    Ok(Json(RunMacroResponse::success(value)))
}

pub async fn run_macro_upload(
    State(svc): State<Arc<MacroService>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart?;

    let mut upload: Option<(String, Bytes)> = None;
    let mut macro_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::bad_request("field 'file' has no filename"))?;
                upload = Some((filename, field.bytes().await?));
            }
            Some("macro_name") => macro_name = Some(field.text().await?),
            _ => {}
        }
    }

    let (filename, contents) =
        upload.ok_or_else(|| ApiError::bad_request("missing multipart field 'file'"))?;
    let macro_name =
        macro_name.ok_or_else(|| ApiError::bad_request("missing multipart field 'macro_name'"))?;

    let processed = svc.run_by_upload(contents, macro_name).await?;

    let disposition = HeaderValue::from_str(&attachment_disposition(&filename))
        .map_err(|e| ApiError::bad_request(format!("unusable upload filename: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(XLSM_CONTENT_TYPE)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        processed,
    )
        .into_response())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `attachment; filename="processed_<name>"`, with the client's name reduced to
/// its last path segment and to characters safe inside a quoted header value.
pub fn attachment_disposition(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let safe: String = base
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"processed_{safe}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn disposition_prefixes_and_sanitizes() {
        assert_eq!(
            attachment_disposition("report.xlsm"),
            r#"attachment; filename="processed_report.xlsm""#
        );
        assert_eq!(
            attachment_disposition(r#"C:\Users\me\Q3 "final".xlsm"#),
            r#"attachment; filename="processed_Q3 _final_.xlsm""#
        );
        assert_eq!(
            attachment_disposition("../../etc/bilan été.xlsm"),
            r#"attachment; filename="processed_bilan _t_.xlsm""#
        );
    }
}

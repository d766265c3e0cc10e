//! Request builders shared by the router tests.

use axum::body::Body as AxumBody;
use axum::http::{Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

const BOUNDARY: &str = "sorted-upload-test-boundary";

pub enum MultipartPart<'a> {
    File {
        field: &'a str,
        file_name: &'a str,
        data: &'a [u8],
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

impl<'a> MultipartPart<'a> {
    pub fn file(field: &'a str, file_name: &'a str, data: &'a [u8]) -> Self {
        MultipartPart::File {
            field,
            file_name,
            data,
        }
    }

    pub fn text(field: &'a str, value: &'a str) -> Self {
        MultipartPart::Text { field, value }
    }
}

/// Builds a `POST /upload` request carrying the given parts.
pub fn multipart_request(parts: &[MultipartPart<'_>]) -> Request<AxumBody> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            MultipartPart::File {
                field,
                file_name,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            MultipartPart::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from(body))
        .expect("multipart request")
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

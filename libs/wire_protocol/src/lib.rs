//! Request/Response JSON shapes shared with clients.
//!
//! These are plain wire types: no pool or driver dependency. The proxy
//! server is responsible for turning a `pg_pool::connection::QueryOutcome`
//! into a [`Response`] and a parsed JSON body into a [`Request`].

use serde::{Deserialize, Serialize};

/// One query request, read from an HTTP POST body or a WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Option<String>>>,
}

impl Request {
    pub fn params(&self) -> &[Option<String>] {
        self.params.as_deref().unwrap_or(&[])
    }
}

/// One column descriptor: `[name, oid]` on the wire.
pub type Field = (String, u32);

/// A query response. Serializes to exactly one of two shapes: a 200 with
/// rows, or a 400/500 with an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        id: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        command: String,
        #[serde(rename = "rowCount")]
        row_count: u64,
        fields: Vec<Field>,
        rows: Vec<Vec<Option<String>>>,
    },
    Failure {
        id: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        error: String,
    },
}

impl Response {
    pub fn success(
        id: impl Into<String>,
        command: impl Into<String>,
        row_count: u64,
        fields: Vec<Field>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        Response::Success {
            id: id.into(),
            status_code: 200,
            command: command.into(),
            row_count,
            fields,
            rows,
        }
    }

    pub fn failure(id: impl Into<String>, status_code: u16, error: impl Into<String>) -> Self {
        Response::Failure {
            id: id.into(),
            status_code,
            error: error.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Response::Success { id, .. } => id,
            Response::Failure { id, .. } => id,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Response::Success { status_code, .. } => *status_code,
            Response::Failure { status_code, .. } => *status_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_params_deserializes() {
        let req: Request = serde_json::from_str(r#"{"id":"q1","query":"SELECT 1"}"#).unwrap();
        assert_eq!(req.params(), &[] as &[Option<String>]);
    }

    #[test]
    fn success_response_shape() {
        let resp = Response::success(
            "q1",
            "SELECT",
            1,
            vec![("num".to_string(), 23)],
            vec![vec![Some("1".to_string())]],
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["fields"][0][0], "num");
        assert_eq!(value["fields"][0][1], 23);
    }

    #[test]
    fn failure_response_round_trips() {
        let resp = Response::failure("q1", 400, "syntax error");
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, back);
    }
}

#![forbid(unsafe_code)]

use poem::Request;
use poem_openapi::{ OpenApi, payload::Json, Object, ApiResponse };
use serde_json::{Number, Value};

use crate::utils::errors::Errors;
use crate::utils::greeter_utils::{self, RequestDebug};

const GREETING_PREFIX: &str = "Hello, ";

// ***************************************************************************
//                          Request/Response Definiions
// ***************************************************************************
pub struct GreetApi;

#[derive(Object, Debug)]
pub struct ReqGreet
{
    /// Who to greet.  Must be a non-empty string, a non-zero number or true.
    name: Option<Value>,
}

#[derive(Object, Debug)]
pub struct RespGreet
{
    message: String,
}

#[derive(Object, Debug)]
pub struct RespError
{
    error: String,
}

// Implement the debug record trait for logging.
impl RequestDebug for ReqGreet {
    type Req = ReqGreet;
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(255);
        s.push_str("  Request body:");
        s.push_str("\n    name: ");
        match &self.name {
            Some(v) => s.push_str(&v.to_string()),
            None => s.push_str("<missing>"),
        }
        s
    }
}

// ------------------- HTTP Status Codes -------------------
#[derive(Debug, ApiResponse)]
pub enum GreetResponse {
    /// The greeting.
    #[oai(status = 200)]
    Http200(Json<RespGreet>),
    /// No usable name in the request body.
    #[oai(status = 400)]
    Http400(Json<RespError>),
}

fn make_http_200(resp: RespGreet) -> GreetResponse {
    GreetResponse::Http200(Json(resp))
}
fn make_http_400(err: Errors) -> GreetResponse {
    GreetResponse::Http400(Json(RespError::new(err.to_string())))
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl GreetApi {
    /// Greet the caller by name.
    #[oai(path = "/", method = "post")]
    async fn greet(&self, http_req: &Request, req: Json<ReqGreet>) -> GreetResponse {
        // Conditional logging depending on log level.
        greeter_utils::debug_request(http_req, &req.0);

        match RespGreet::process(&req.0) {
            Ok(r) => make_http_200(r),
            Err(e) => make_http_400(e),
        }
    }
}

// ***************************************************************************
//                          Request/Response Methods
// ***************************************************************************
impl ReqGreet {
    /** Return the text to greet or NameRequired.  Missing, null, empty
     * string, false and zero are rejected, as are arrays and objects.  A
     * non-empty string is used exactly as sent; true and non-zero numbers
     * are rendered as text.
     */
    fn validated_name(&self) -> Result<String, Errors> {
        match &self.name {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Bool(true)) => Ok(true.to_string()),
            Some(Value::Number(n)) => number_name(n),
            _ => Err(Errors::NameRequired),
        }
    }
}

impl RespGreet {
    fn new(name: &str) -> Self {
        Self {message: format!("{}{}", GREETING_PREFIX, name)}
    }

    fn process(req: &ReqGreet) -> Result<RespGreet, Errors> {
        let name = req.validated_name()?;
        Ok(Self::new(&name))
    }
}

impl RespError {
    fn new(error: String) -> Self {
        Self {error}
    }
}

// ***************************************************************************
//                          Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// number_name:
// ---------------------------------------------------------------------------
// Floats print in shortest form, so 1e3 greets "1000" rather than "1000.0".
fn number_name(n: &Number) -> Result<String, Errors> {
    if let Some(i) = n.as_i64() {
        return if i == 0 {Err(Errors::NameRequired)} else {Ok(i.to_string())};
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    match n.as_f64() {
        Some(f) if f != 0.0 => Ok(f.to_string()),
        _ => Err(Errors::NameRequired),
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::{ReqGreet, RespGreet};
    use crate::utils::errors::Errors;
    use serde_json::{json, Value};

    fn req(name: Option<Value>) -> ReqGreet {
        ReqGreet {name}
    }

    fn greeting(name: Value) -> Option<String> {
        RespGreet::process(&req(Some(name))).ok().map(|r| r.message)
    }

    #[test]
    fn string_name_is_greeted_verbatim() {
        assert_eq!(greeting(json!("Ada")).as_deref(), Some("Hello, Ada"));
        assert_eq!(greeting(json!("123")).as_deref(), Some("Hello, 123"));
        assert_eq!(greeting(json!("  Ada  ")).as_deref(), Some("Hello,   Ada  "));
        assert_eq!(greeting(json!("<b>\"x\"</b>")).as_deref(), Some("Hello, <b>\"x\"</b>"));
    }

    #[test]
    fn missing_name_is_rejected() {
        assert!(matches!(req(None).validated_name(), Err(Errors::NameRequired)));
    }

    #[test]
    fn falsy_names_are_rejected() {
        for v in [json!(""), json!(false), json!(0), json!(0.0), json!(-0.0)] {
            assert!(greeting(v.clone()).is_none(), "expected rejection of {}", v);
        }
    }

    #[test]
    fn arrays_and_objects_are_rejected() {
        for v in [json!([]), json!(["Ada"]), json!({}), json!({"first": "Ada"})] {
            assert!(greeting(v.clone()).is_none(), "expected rejection of {}", v);
        }
    }

    #[test]
    fn truthy_scalars_are_stringified() {
        assert_eq!(greeting(json!(true)).as_deref(), Some("Hello, true"));
        assert_eq!(greeting(json!(42)).as_deref(), Some("Hello, 42"));
        assert_eq!(greeting(json!(-7)).as_deref(), Some("Hello, -7"));
        assert_eq!(greeting(json!(u64::MAX)).as_deref(), Some("Hello, 18446744073709551615"));
        assert_eq!(greeting(json!(1.5)).as_deref(), Some("Hello, 1.5"));
        assert_eq!(greeting(json!(1e3)).as_deref(), Some("Hello, 1000"));
        assert_eq!(greeting(json!(1e21)).as_deref(), Some("Hello, 1000000000000000000000"));
    }

    #[test]
    fn error_text_is_fixed() {
        assert_eq!(Errors::NameRequired.to_string(), "Name is required");
    }
}

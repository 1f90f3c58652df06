//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1
    Ok = 200,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.4 — directory traversal and permission denials land here.
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.5.14 — request line or headers exceeded the configured limit.
    ContentTooLarge = 413,
    /// 15.6.1
    InternalServerError = 500,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", *self as u16))
    }
}

impl Status {
    /// The status code as a bare integer, for the response's status line.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// The standard reason phrase, as written on the wire after the code.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::ContentTooLarge => "Content Too Large",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    /// Name of the bundled error page served for this status, or `None`
    /// for statuses that don't carry one (e.g. a plain `200 OK`).
    pub fn error_page(self) -> Option<&'static str> {
        match self {
            Self::BadRequest => Some("400.html"),
            Self::Forbidden => Some("403.html"),
            Self::NotFound => Some("404.html"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_discriminant() {
        assert_eq!(404, Status::NotFound.code());
    }

    #[test]
    fn reason_is_the_standard_phrase() {
        assert_eq!("Not Found", Status::NotFound.reason());
        assert_eq!("OK", Status::Ok.reason());
    }

    #[test]
    fn only_client_error_statuses_carry_an_error_page() {
        assert!(Status::NotFound.error_page().is_some());
        assert!(Status::Ok.error_page().is_none());
        assert!(Status::InternalServerError.error_page().is_none());
    }
}

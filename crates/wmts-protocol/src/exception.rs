//! OWS exception reports.

use cube_common::CubeError;
use quick_xml::escape::escape;

/// OWS 1.1 `ExceptionReport` with a single exception.
pub fn exception_report(code: &str, message: &str, locator: Option<&str>) -> String {
    let locator = locator
        .map(|l| format!(r#" locator="{}""#, escape(l)))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="1.0.0" xml:lang="en">
  <ows:Exception exceptionCode="{}"{}>
    <ows:ExceptionText>{}</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>
"#,
        code,
        locator,
        escape(message)
    )
}

/// Exception report for an error, with the offending parameter as locator.
pub fn error_report(error: &CubeError) -> String {
    let locator = match error {
        CubeError::MissingParameter(p) => Some(p.as_str()),
        CubeError::InvalidParameter { param, .. } => Some(param.as_str()),
        _ => None,
    };
    exception_report(error.exception_code(), &error.to_string(), locator)
}

//! Unwrapping of the `{domain: {result, error}}` response envelope.

use serde_json::Value;
use tickerfeed_core::{DataError, Result};
use tracing::debug;

use crate::field::{Field, array_field, str_field, value};

/// Returns the `result` array inside `domain`.
///
/// A null or empty result is [`DataError::NoData`]. An upstream error object
/// whose code is `Not Found` becomes [`DataError::SymbolNotFound`]; any other
/// error object is a [`DataError::Shape`].
pub(crate) fn results(body: &str, domain: &str) -> Result<Vec<Value>> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| DataError::Shape(format!("{domain} response is not JSON: {e}")))?;

    let block = match value(&root, domain) {
        Field::Present(block) => block,
        Field::Missing => {
            if let Field::Present(error) = value(&root, "error") {
                return Err(upstream_error(error));
            }
            return Err(DataError::Shape(format!("response has no '{domain}' envelope")));
        }
        Field::WrongType => {
            return Err(DataError::Shape("response is not a JSON object".to_string()));
        }
    };

    if let Field::Present(error) = value(block, "error") {
        return Err(upstream_error(error));
    }

    match array_field(block, "result") {
        Field::Present(items) if !items.is_empty() => Ok(items.clone()),
        Field::Present(_) | Field::Missing => {
            debug!(domain, "empty result");
            Err(DataError::NoData(format!("{domain} returned no results")))
        }
        Field::WrongType => Err(DataError::Shape(format!("{domain}.result is not an array"))),
    }
}

/// First element of [`results`].
pub(crate) fn first_result(body: &str, domain: &str) -> Result<Value> {
    let mut items = results(body, domain)?;
    Ok(items.swap_remove(0))
}

fn upstream_error(error: &Value) -> DataError {
    let code = str_field(error, "code").ok().unwrap_or("unknown");
    let description = str_field(error, "description").ok().unwrap_or_default();
    if code.eq_ignore_ascii_case("Not Found") {
        DataError::SymbolNotFound(description.to_string())
    } else {
        DataError::Shape(format!("upstream error {code}: {description}"))
    }
}

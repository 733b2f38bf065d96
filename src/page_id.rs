// SPDX-License-Identifier: MIT
//! Page identifier validation
//!
//! Page identifiers double as component file names and as directory
//! entries inside a multi-page index, so the accepted grammar is strict:
//! `[A-Za-z0-9_+.-]+`, no leading `.`/`+`/`-`, no `..`, and the `.djvu`
//! extension is mandatory.

use std::sync::LazyLock;

use regex::Regex;

use crate::chunks::DJVU_EXT;

static PAGE_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+.-]+$").expect("hard-coded pattern"));

/// Reasons a page identifier is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageIdError {
    #[error("page identifier must consist only of ASCII letters, digits, _, +, - and dot")]
    Charset,

    #[error("page identifier cannot start with +, - or a dot")]
    Prefix,

    #[error("page identifier cannot contain two consecutive dots")]
    ConsecutiveDots,

    #[error("page identifier must end with the {DJVU_EXT} extension")]
    Extension,
}

/// Validate a page identifier, returning it unchanged on success.
pub fn validate_page_id(page_id: &str) -> Result<&str, PageIdError> {
    if !PAGE_ID_CHARS.is_match(page_id) {
        return Err(PageIdError::Charset);
    }
    if page_id.starts_with(['.', '+', '-']) {
        return Err(PageIdError::Prefix);
    }
    if page_id.contains("..") {
        return Err(PageIdError::ConsecutiveDots);
    }
    if !page_id.ends_with(DJVU_EXT) {
        return Err(PageIdError::Extension);
    }
    Ok(page_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids_are_idempotent() {
        for page_id in ["p0001.djvu", "scan_12+r.djvu", "a.b.djvu", "0.djvu"] {
            let accepted = validate_page_id(page_id).unwrap();
            assert_eq!(accepted, page_id);
            assert_eq!(validate_page_id(accepted), Ok(page_id));
        }
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(validate_page_id(""), Err(PageIdError::Charset));
    }

    #[test]
    fn test_bad_characters_rejected() {
        assert_eq!(validate_page_id("pag e.djvu"), Err(PageIdError::Charset));
        assert_eq!(validate_page_id("page/1.djvu"), Err(PageIdError::Charset));
        assert_eq!(validate_page_id("stra\u{df}e.djvu"), Err(PageIdError::Charset));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        assert_eq!(validate_page_id(".hidden.djvu"), Err(PageIdError::Prefix));
        assert_eq!(validate_page_id("+page.djvu"), Err(PageIdError::Prefix));
        assert_eq!(validate_page_id("-page.djvu"), Err(PageIdError::Prefix));
    }

    #[test]
    fn test_consecutive_dots_rejected() {
        assert_eq!(validate_page_id("a..b.djvu"), Err(PageIdError::ConsecutiveDots));
    }

    #[test]
    fn test_missing_extension_rejected() {
        assert_eq!(validate_page_id("page"), Err(PageIdError::Extension));
        assert_eq!(validate_page_id("page.iff"), Err(PageIdError::Extension));
        assert_eq!(validate_page_id("page.DJVU"), Err(PageIdError::Extension));
    }
}

//! Status code classification

use super::types::Category;

/// Map an HTTP status code to its category
///
/// Codes outside 100-599 (and 1xx) are `Provisional`; upstream data is not
/// trusted to be well formed.
pub fn classify(status: i32) -> Category {
    match status {
        200..=299 => Category::Success,
        300..=399 => Category::Redirect,
        400..=499 => Category::BadRequest,
        500..=599 => Category::Error,
        _ => Category::Provisional,
    }
}

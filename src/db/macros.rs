//! Parameter list macro.

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// # Example
///
/// ```ignore
/// session.exec("INSERT INTO t (id, name) VALUES (?, ?)", &params![1, "a"]).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

pub use params;

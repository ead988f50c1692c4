//! Macros for building call arguments with less boilerplate

/// Builds [`Arguments`](crate::Arguments) from `name => value` pairs.
///
/// Values go through `serde_json::json!`, so anything `Serialize` works.
///
/// # Example
///
/// ```rust
/// use wirecall_client::args;
/// let args = args! { "a" => 341.2, "b" => 359.3 };
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Arguments::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::Arguments::new();
        $(
            args.insert_value($name, $crate::__serde_json::json!($value));
        )+
        args
    }};
}

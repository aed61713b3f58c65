/// Returns early with `$error` unless `$predicate` holds.
///
/// ```ignore
/// ensure!(url.len() <= self.max_url, ParseError::uri_too_long(url.len(), self.max_url));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

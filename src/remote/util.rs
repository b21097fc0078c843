//! Utility functions for path manipulation.

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
///
/// # Examples
///
/// ```
/// # use ofen::remote::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/files/motd"), format!("{home}/files/motd"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

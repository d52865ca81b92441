//! Chaos/failpoint hooks (feature: `failpoints`).
//!
//! Keep this extremely light: the macro expands to nothing unless the feature
//! is enabled. When enabled, a point named in the comma-separated
//! `PULLFLOW_FAILPOINTS` variable makes the enclosing function return
//! `ExecError::Injected`.

#[cfg(feature = "failpoints")]
pub fn armed(name: &str) -> bool {
    std::env::var("PULLFLOW_FAILPOINTS")
        .map(|v| v.split(',').any(|p| p.trim() == name))
        .unwrap_or(false)
}

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        if $crate::failpoints::armed($name) {
            return Err($crate::ExecError::Injected($name.to_string()));
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        // no-op
        let _ = $name;
    };
}

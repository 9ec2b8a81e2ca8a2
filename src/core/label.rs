//! Unique symbol names for jump targets and data locations.
//!
//! Labels are minted by [`CompilationSession::mint_label`] from a single
//! monotonically increasing counter and interned in the session arena, so
//! they are `Copy` and never recycled.
//!
//! [`CompilationSession::mint_label`]: crate::core::session::CompilationSession::mint_label

use std::fmt;

/// An opaque, compilation-unique assembly symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label<'arena>(&'arena str);

impl<'arena> Label<'arena> {
    pub(crate) fn from_interned(name: &'arena str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'arena str {
        self.0
    }
}

impl fmt::Display for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Reduce an arbitrary source name to characters NASM accepts in a symbol.
pub fn sanitize(hint: &str) -> String {
    hint.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("my-func.v2"), "my_func_v2");
        assert_eq!(sanitize("plain_name"), "plain_name");
    }
}

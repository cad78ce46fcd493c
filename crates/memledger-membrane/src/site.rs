//! Call-site capture and allocation tags.

use std::fmt;

use memledger_core::Labels;
use serde::Serialize;

/// Source location of an allocation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Site {
    pub file: &'static str,
    /// Enclosing module path; Rust has no stable function-name macro.
    pub function: &'static str,
    pub line: u32,
}

impl Site {
    #[must_use]
    pub const fn new(file: &'static str, function: &'static str, line: u32) -> Self {
        Self {
            file,
            function,
            line,
        }
    }

    /// Placeholder for internally generated calls.
    #[must_use]
    pub const fn unknown() -> Self {
        Self::new("", "", 0)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            return f.write_str("<unknown>");
        }
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

/// Capture the current [`Site`].
#[macro_export]
macro_rules! site {
    () => {
        $crate::Site::new(file!(), module_path!(), line!())
    };
}

/// Classification labels attached to one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    pub type_name: Option<&'a str>,
    pub name: Option<&'a str>,
    pub site: Site,
}

impl<'a> Tag<'a> {
    #[must_use]
    pub const fn new(site: Site) -> Self {
        Self {
            type_name: None,
            name: None,
            site,
        }
    }

    #[must_use]
    pub const fn with_type(mut self, type_name: &'a str) -> Self {
        self.type_name = Some(type_name);
        self
    }

    #[must_use]
    pub const fn with_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Labels used to classify the block. Empty site fields stay unset.
    #[must_use]
    pub fn labels(&self) -> Labels<'a> {
        Labels {
            type_name: self.type_name,
            name: self.name,
            file: (!self.site.file.is_empty()).then_some(self.site.file),
            function: (!self.site.function.is_empty()).then_some(self.site.function),
            line: self.site.line,
        }
    }
}

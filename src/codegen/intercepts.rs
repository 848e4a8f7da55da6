use proc_macro2::{Literal, TokenStream};
use quote::quote;

use crate::analysis::location::SourceLocation;

/// One row of the generated `LOCATIONS` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRow {
    pub location: SourceLocation,
    /// `<unit>::<substitute>`, relative to the generated module.
    pub substitute: String,
}

/// Source of `intercepts.rs`: the record type, the table and its lookup.
pub fn intercepts_module(rows: &[InterceptRow]) -> TokenStream {
    let mut rows = rows.to_vec();
    rows.sort_by(|a, b| {
        (&a.location.file, a.location.line, a.location.column).cmp(&(
            &b.location.file,
            b.location.line,
            b.location.column,
        ))
    });
    let entries = rows.iter().map(|row| {
        let file = Literal::string(&row.location.file);
        let line = Literal::usize_unsuffixed(row.location.line);
        let column = Literal::usize_unsuffixed(row.location.column);
        let substitute = Literal::string(&row.substitute);
        quote! {
            InterceptsLocation {
                file: #file,
                line: #line,
                column: #column,
                substitute: #substitute,
            }
        }
    });

    quote! {
        /// A call site redirected to a precomputed substitute.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct InterceptsLocation {
            pub file: &'static str,
            pub line: u32,
            pub column: u32,
            pub substitute: &'static str,
        }

        pub static LOCATIONS: &[InterceptsLocation] = &[#(#entries),*];

        /// Substitute registered for a call site, if any.
        pub fn lookup(file: &str, line: u32, column: u32) -> ::core::option::Option<&'static InterceptsLocation> {
            LOCATIONS
                .iter()
                .find(|entry| entry.file == file && entry.line == line && entry.column == column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::location::Span;

    #[test]
    fn rows_are_sorted_by_position() {
        let row = |line, substitute: &str| InterceptRow {
            location: SourceLocation::new("src/main.rs", line, 5, Span::new(0, 1)),
            substitute: substitute.into(),
        };
        let text: String = intercepts_module(&[row(9, "b::late"), row(2, "a::early")])
            .to_string()
            .split_whitespace()
            .collect();
        let early = text.find("a::early").expect("early row");
        let late = text.find("b::late").expect("late row");
        assert!(early < late);
        assert!(text.contains("line:2,column:5"));
        assert!(text.contains("pubfnlookup("));
    }
}

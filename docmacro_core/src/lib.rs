//! `docmacro_core` is the scanner of [docmacro]. It rewrites a markdown
//! document containing executable macros into plain markdown in which every
//! macro has become a code span tagged with classes, ready for a document
//! filter to execute through the `docmacro_server` crate.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Markdown document
//!   -> Driver loop (bulk-copies prose up to the next trigger byte)
//!   -> Span readers (comments are dropped; escapes, code and math are copied as units)
//!   -> Macro readers (identifier, expression, block, raw, script and markdown includes)
//!   -> Code spans: `` print(x) ``{.py} or a fenced ```{.py} block when solo
//! ```
//!
//! ## Macro Syntax
//!
//! | Form                                | Expands to                                       |
//! | ----------------------------------- | ------------------------------------------------ |
//! | `%name`, `%f(x).y[1]`               | `print(...)` of the expression                   |
//! | `%(a + b)`                          | `print(a + b)`                                   |
//! | `%x:>8.2f`                          | `print(doc.format(x, ">8.2f"))`                  |
//! | `%%name`                            | a document fragment (`.py-md`)                   |
//! | `%x;`                               | executed, nothing rendered (`.quiet`)            |
//! | `i%x` / `b%x`                       | forced inline / block rendering                  |
//! | `%{ statements }`                   | the statements, de-indented                      |
//! | `%note{text}{{raw}}`                | `note(doc.fragment([[...]]), [[...]])`           |
//! | `%%%py{scripts/{format}.lua}`       | a script run by the filter (`.py-file`)          |
//! | `%%%md{chapter.md}`                 | the preprocessed contents of `chapter.md`        |
//! | `%%%mdifformat{html: a.md; pdf: b.md}` | the file whose clause lists the target format |
//!
//! ## Quick Start
//!
//! ```rust
//! use docmacro_core::PreprocessOptions;
//! use docmacro_core::preprocess;
//!
//! let options = PreprocessOptions::new("html");
//! let output = preprocess("Total: %(1 + 2)", &options).unwrap();
//! assert_eq!(output, "Total: `` print(1 + 2) ``{.py}");
//! ```
//!
//! [docmacro]: ../docmacro/index.html

pub use config::*;
pub use emit::*;
pub use error::*;
pub use format_spec::*;
pub use include::FormatClause;
pub use include::missing_file_message;
pub use include::parse_format_clauses;
pub use matcher::*;
pub use position::*;
pub use preprocess::PreprocessOptions;
pub use preprocess::preprocess;
pub use preprocess::preprocess_file;
pub use spans::*;

pub mod config;
mod emit;
#[allow(unused_assignments)]
mod error;
pub mod format_spec;
mod include;
mod macros;
mod matcher;
mod position;
mod preprocess;
mod spans;

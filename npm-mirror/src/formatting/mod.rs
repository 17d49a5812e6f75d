//! CLI formatting utilities.
//!
//! Consistent colors and layout for everything the CLI prints to stdout.

mod headers;
mod output;
mod status;

pub use headers::{print_section_header, SectionStyle};
pub use output::{
    format_bytes, format_duration, print_key_value, print_separator_with_spacing,
    print_summary_box,
};
pub use status::{print_error, print_success, print_warning};

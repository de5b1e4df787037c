//! Rendering of run outcomes and date reports.

mod generator;

pub use generator::{
    generate_date_json_report, generate_date_markdown_report, generate_date_text_report,
    generate_json_report, generate_markdown_report, generate_text_report, write_report,
};

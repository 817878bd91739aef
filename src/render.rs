use serde::Serialize;

use crate::batch::RunReport;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize json: {}", e),
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorOut<'a> {
    pub code: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

pub fn print_json_error(code: &str, message: &str, hint: Option<&str>) {
    let err = ErrorOut { code, message, hint };
    print_json(&err);
}

pub fn render_run_report(report: &RunReport) {
    println!("{}", report.summary);
    if !report.errors.is_empty() {
        println!("errors (first {}):", report.errors.len());
        for e in &report.errors {
            println!("- {}", e);
        }
    }
}

pub fn render_pipeline_trace(trace: &[String], output: &str) {
    println!("trace:");
    for entry in trace {
        println!("  {}", entry);
    }
    println!("\noutput> {}", output);
}

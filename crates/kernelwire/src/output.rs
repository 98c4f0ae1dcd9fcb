use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use kernelwire_frame::PubMessage;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print label/value pairs as a two-column table or aligned text.
pub fn print_fields(title: &str, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (label, value) in fields {
                table.add_row(vec![label.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        _ => {
            println!("{title}:");
            let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
            for (label, value) in fields {
                println!("  {label:<width$}  {value}");
            }
        }
    }
}

#[derive(Serialize)]
struct BroadcastOutput<'a> {
    msg_type: &'a str,
    topic: &'a str,
    parent_msg_id: Option<&'a str>,
    date: &'a str,
    content: &'a Value,
}

pub fn print_broadcast(message: &PubMessage, format: OutputFormat) {
    let header = &message.body.header;
    let parent = message
        .body
        .parent_header
        .as_ref()
        .map(|parent| parent.msg_id.as_str());
    match format {
        OutputFormat::Json => print_json(&BroadcastOutput {
            msg_type: &header.msg_type,
            topic: &message.topic,
            parent_msg_id: parent,
            date: &header.date,
            content: &message.body.content,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "PARENT", "SUMMARY"])
                .add_row(vec![
                    header.msg_type.clone(),
                    parent.unwrap_or("-").to_string(),
                    summary(&header.msg_type, &message.body.content),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} parent={} {}",
                header.msg_type,
                parent.unwrap_or("-"),
                summary(&header.msg_type, &message.body.content)
            );
        }
        OutputFormat::Raw => {
            if let Some(text) = visible_text(&header.msg_type, &message.body.content) {
                print_raw(text.as_bytes());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// What a notebook frontend would render for an output broadcast.
pub fn visible_text(msg_type: &str, content: &Value) -> Option<String> {
    match msg_type {
        "stream" => content["text"].as_str().map(str::to_string),
        "execute_result" | "display_data" | "update_display_data" => content["data"]["text/plain"]
            .as_str()
            .map(|text| format!("{text}\n")),
        "error" => Some(format!(
            "{}: {}\n",
            content["ename"].as_str().unwrap_or("Error"),
            content["evalue"].as_str().unwrap_or_default()
        )),
        _ => None,
    }
}

/// One-line description of a broadcast.
pub fn summary(msg_type: &str, content: &Value) -> String {
    match msg_type {
        "status" => content["execution_state"].as_str().unwrap_or("?").to_string(),
        "execute_input" => format!(
            "[{}] {}",
            content["execution_count"],
            content["code"].as_str().unwrap_or_default()
        ),
        "comm_open" => format!(
            "{} target={}",
            content["comm_id"].as_str().unwrap_or_default(),
            content["target_name"].as_str().unwrap_or_default()
        ),
        _ => match visible_text(msg_type, content) {
            Some(text) => text.trim_end().to_string(),
            None => content.to_string(),
        },
    }
}

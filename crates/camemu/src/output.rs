use std::io::IsTerminal;

use camemu::buffer::FrameHeader;
use camemu::protocol::{ControlMessage, MessageKind};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

/// A reply or notification plus whatever the CLI learned alongside it.
#[derive(Serialize)]
struct MessageOutput<'a> {
    #[serde(flatten)]
    message: &'a ControlMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<HeaderOutput>,
}

#[derive(Serialize)]
struct HeaderOutput {
    frame_number: u32,
    width: u32,
    height: u32,
    data_type: String,
    payload_size: u32,
}

impl From<&FrameHeader> for HeaderOutput {
    fn from(header: &FrameHeader) -> Self {
        Self {
            frame_number: header.frame_number,
            width: header.width,
            height: header.height,
            data_type: header.data_type.to_string(),
            payload_size: header.payload_size,
        }
    }
}

fn print_json(message: &ControlMessage, header: Option<&FrameHeader>) {
    let out = MessageOutput {
        message,
        header: header.map(HeaderOutput::from),
    };
    println!(
        "{}",
        serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print a control reply (ack/nack) with all of its params.
pub fn print_reply(reply: &ControlMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reply, None),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["reply".to_string(), reply.kind.as_str().to_string()])
                .add_row(vec!["value".to_string(), reply.value.clone()]);
            for (key, value) in flatten_params(&reply.params) {
                table.add_row(vec![key, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{} {}", reply.kind.as_str(), reply.value);
            if let Some(id) = reply.id {
                line.push_str(&format!(" id={id}"));
            }
            for (key, value) in flatten_params(&reply.params) {
                line.push_str(&format!(" {key}={value}"));
            }
            println!("{line}");
        }
    }
}

/// Print one notification from the ready channel.
pub fn print_notification(
    message: &ControlMessage,
    header: Option<&FrameHeader>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(message, header),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NOTIFY", "PARAMS", "HEADER"])
                .add_row(vec![
                    message.value.clone(),
                    params_inline(message),
                    header.map(header_inline).unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{} {}", message.kind.as_str(), message.value);
            let params = params_inline(message);
            if !params.is_empty() {
                line.push(' ');
                line.push_str(&params);
            }
            if let Some(header) = header {
                line.push_str(" | ");
                line.push_str(&header_inline(header));
            }
            println!("{line}");
        }
    }
}

fn params_inline(message: &ControlMessage) -> String {
    flatten_params(&message.params)
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn header_inline(header: &FrameHeader) -> String {
    format!(
        "frame={} {}x{} {} {}B",
        header.frame_number, header.width, header.height, header.data_type, header.payload_size
    )
}

/// Nested objects become dotted keys so they fit in one table column.
pub fn flatten_params(params: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    for (key, value) in params {
        flatten_into(key, value, &mut rows);
    }
    rows
}

fn flatten_into(prefix: &str, value: &Value, rows: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, inner) in map {
                flatten_into(&format!("{prefix}.{key}"), inner, rows);
            }
        }
        Value::String(text) => rows.push((prefix.to_string(), text.clone())),
        other => rows.push((prefix.to_string(), other.to_string())),
    }
}

/// `true` when a reply should turn into a nonzero exit code.
pub fn is_nack(reply: &ControlMessage) -> bool {
    reply.kind == MessageKind::Nack
}

//! Streaming delta parser for the chat response stream
//!
//! The response body is a newline-delimited record stream. Transport chunks
//! may split a record anywhere, including inside the `data:` marker itself,
//! so incomplete trailing fragments are buffered and prefixed to the next
//! chunk rather than dropped or parsed early.

use serde::Deserialize;

const DATA_MARKER: &str = "data:";
const DONE_PAYLOAD: &str = "[DONE]";

/// Events produced while parsing the response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    /// Incremental assistant-visible answer text
    Answer(String),
    /// Incremental thinking text
    Reasoning(String),
    /// A complete thinking block delivered in one record
    ReasoningFinal(String),
    /// A payload that failed to decode, carried raw for diagnostics.
    /// One bad record never aborts the stream.
    Malformed(String),
}

/// A decoded stream record. Decoded once here, at the parser boundary;
/// consumers only ever see [`DeltaEvent`]s.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRecord {
    /// Delta frame with independent answer and reasoning channels
    Delta { choices: Vec<WireChoice> },
    /// Terminal frame carrying the complete reasoning text
    Terminal { reasoning: String },
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Incremental parser turning raw transport chunks into [`DeltaEvent`]s
#[derive(Debug, Default)]
pub struct DeltaParser {
    carry: Vec<u8>,
}

impl DeltaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DeltaEvent> {
        self.carry.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            parse_line(String::from_utf8_lossy(&line).trim(), &mut events);
        }
        events
    }

    /// Drain a final unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        if !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            parse_line(String::from_utf8_lossy(&line).trim(), &mut events);
        }
        events
    }
}

fn parse_line(line: &str, events: &mut Vec<DeltaEvent>) {
    // Only marker lines are significant; everything else (blank lines,
    // comments, other SSE fields) is skipped.
    let Some(payload) = line.strip_prefix(DATA_MARKER) else {
        return;
    };
    let payload = payload.trim_start();
    if payload.is_empty() || payload == DONE_PAYLOAD {
        return;
    }

    match serde_json::from_str::<WireRecord>(payload) {
        Ok(WireRecord::Delta { choices }) => {
            for choice in choices {
                if let Some(reasoning) = choice.delta.reasoning_content {
                    events.push(DeltaEvent::Reasoning(reasoning));
                }
                if let Some(content) = choice.delta.content {
                    events.push(DeltaEvent::Answer(content));
                }
            }
        }
        Ok(WireRecord::Terminal { reasoning }) => {
            events.push(DeltaEvent::ReasoningFinal(reasoning));
        }
        Err(_) => events.push(DeltaEvent::Malformed(payload.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(parser: &mut DeltaParser, chunk: &str) -> Vec<DeltaEvent> {
        parser.feed(chunk.as_bytes())
    }

    #[test]
    fn test_single_answer_delta() {
        let mut parser = DeltaParser::new();
        let events = feed_str(
            &mut parser,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n",
        );
        assert_eq!(events, vec![DeltaEvent::Answer("Hello".into())]);
    }

    #[test]
    fn test_multiple_records_in_one_chunk() {
        let mut parser = DeltaParser::new();
        let events = feed_str(
            &mut parser,
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\
             data: [DONE]\n",
        );
        assert_eq!(
            events,
            vec![
                DeltaEvent::Answer("He".into()),
                DeltaEvent::Answer("llo".into()),
            ]
        );
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "da").is_empty());
        let events = feed_str(
            &mut parser,
            "ta: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
        );
        assert_eq!(events, vec![DeltaEvent::Answer("Hi".into())]);
    }

    #[test]
    fn test_payload_split_across_chunks() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "data: {\"choices\":[{\"delta\":{\"cont").is_empty());
        let events = feed_str(&mut parser, "ent\":\"Par\"}}]}\n");
        assert_eq!(events, vec![DeltaEvent::Answer("Par".into())]);
    }

    #[test]
    fn test_reasoning_and_answer_in_one_record() {
        let mut parser = DeltaParser::new();
        let events = feed_str(
            &mut parser,
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\",\"reasoning_content\":\"think\"}}]}\n",
        );
        assert_eq!(
            events,
            vec![
                DeltaEvent::Reasoning("think".into()),
                DeltaEvent::Answer("A".into()),
            ]
        );
    }

    #[test]
    fn test_terminal_reasoning_record() {
        let mut parser = DeltaParser::new();
        let events = feed_str(&mut parser, "data: {\"reasoning\":\"all of it\"}\n");
        assert_eq!(events, vec![DeltaEvent::ReasoningFinal("all of it".into())]);
    }

    #[test]
    fn test_done_yields_no_event() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "data: [DONE]\n").is_empty());
    }

    #[test]
    fn test_malformed_payload_continues() {
        let mut parser = DeltaParser::new();
        let events = feed_str(
            &mut parser,
            "data: {not json}\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(
            events,
            vec![
                DeltaEvent::Malformed("{not json}".into()),
                DeltaEvent::Answer("ok".into()),
            ]
        );
    }

    #[test]
    fn test_unrecognized_json_is_malformed() {
        let mut parser = DeltaParser::new();
        let events = feed_str(&mut parser, "data: {\"unrelated\":1}\n");
        assert_eq!(events, vec![DeltaEvent::Malformed("{\"unrelated\":1}".into())]);
    }

    #[test]
    fn test_blank_and_non_marker_lines_ignored() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "\n\nevent: ping\n: comment\n").is_empty());
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = DeltaParser::new();
        let events = feed_str(
            &mut parser,
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n",
        );
        assert_eq!(events, vec![DeltaEvent::Answer("x".into())]);
    }

    #[test]
    fn test_empty_delta_object_yields_nothing() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "data: {\"choices\":[{\"delta\":{}}]}\n").is_empty());
    }

    #[test]
    fn test_finish_drains_unterminated_line() {
        let mut parser = DeltaParser::new();
        assert!(feed_str(&mut parser, "data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}").is_empty());
        assert_eq!(parser.finish(), vec![DeltaEvent::Answer("end".into())]);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_multibyte_content_split_mid_character() {
        // A UTF-8 sequence split across chunks must survive because only
        // complete lines are decoded.
        let record = "data: {\"choices\":[{\"delta\":{\"content\":\"日本\"}}]}\n".as_bytes();
        let (a, b) = record.split_at(record.len() - 8);
        let mut parser = DeltaParser::new();
        assert!(parser.feed(a).is_empty());
        assert_eq!(parser.feed(b), vec![DeltaEvent::Answer("日本".into())]);
    }
}

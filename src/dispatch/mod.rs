// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command parsing and dispatch against the document store.

use crate::store::{CreateError, DocumentStore, SectionLookupError, MAX_SECTIONS};

/// Split a command line into a positional argument vector. Splits on spaces
/// and tabs; a double-quoted span becomes a single argument that may contain
/// interior whitespace. An unterminated quote absorbs through end of line.
pub fn parse_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ') | Some('\t')) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some('"') => {
                chars.next();
                let mut arg = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    arg.push(c);
                }
                args.push(arg);
            }
            Some(_) => {
                let mut arg = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ' ' || c == '\t' {
                        break;
                    }
                    arg.push(c);
                    chars.next();
                }
                args.push(arg);
            }
        }
    }

    args
}

/// Outcome of dispatching one COMMAND-mode line.
pub enum DispatchOutcome {
    /// Send these bytes back, stay in COMMAND mode.
    Reply(Vec<u8>),
    /// Send these bytes, then close the connection (`bye`).
    Close(Vec<u8>),
    /// Resolved a write target; caller should send `reply` then transition
    /// to WRITE mode.
    EnterWrite {
        doc_index: usize,
        section_index: usize,
        reply: Vec<u8>,
    },
}

/// Dispatch a parsed COMMAND-mode line.
pub async fn dispatch(args: &[String], store: &DocumentStore) -> DispatchOutcome {
    match args.first().map(String::as_str) {
        None => DispatchOutcome::Reply(Vec::new()),
        Some("create") => dispatch_create(args, store).await,
        Some("write") => dispatch_write(args, store).await,
        Some("read") => dispatch_read(args, store).await,
        Some("bye") => DispatchOutcome::Close(b"[Disconnected]\n".to_vec()),
        Some(_) => DispatchOutcome::Reply(b"[Error] Unknown command.\n".to_vec()),
    }
}

async fn dispatch_create(args: &[String], store: &DocumentStore) -> DispatchOutcome {
    if args.len() < 3 {
        return DispatchOutcome::Reply(b"[Error] Invalid create command.\n".to_vec());
    }

    let title = &args[1];
    let count = match args[2].parse::<usize>() {
        Ok(c) if (1..=MAX_SECTIONS).contains(&c) && args.len() == 3 + c => c,
        _ => {
            return DispatchOutcome::Reply(b"[Error] Invalid section count or titles.\n".to_vec());
        }
    };

    let section_names = args[3..3 + count].to_vec();

    match store.create(title, &section_names).await {
        Ok(_) => DispatchOutcome::Reply(b"[OK] Document created.\n".to_vec()),
        Err(CreateError::AlreadyExists) => {
            DispatchOutcome::Reply(b"[Error] Document already exists.\n".to_vec())
        }
        Err(CreateError::InvalidShape) => {
            DispatchOutcome::Reply(b"[Error] Invalid section count or titles.\n".to_vec())
        }
        Err(CreateError::CapacityExceeded) => {
            DispatchOutcome::Reply(b"[Error] Invalid create command.\n".to_vec())
        }
    }
}

async fn dispatch_write(args: &[String], store: &DocumentStore) -> DispatchOutcome {
    if args.len() != 3 {
        return DispatchOutcome::Reply(b"[Error] Invalid write command.\n".to_vec());
    }

    let handle = match store.find(&args[1]).await {
        Some(handle) => handle,
        None => return DispatchOutcome::Reply(b"[Error] Document not found.\n".to_vec()),
    };

    let section_index = match handle.section_index(&args[2]) {
        Some(index) => index,
        None => return DispatchOutcome::Reply(b"[Error] Section not found.\n".to_vec()),
    };

    DispatchOutcome::EnterWrite {
        doc_index: handle.index,
        section_index,
        reply: b"[OK] You can start writing. Send <END> to finish.\n>> ".to_vec(),
    }
}

async fn dispatch_read(args: &[String], store: &DocumentStore) -> DispatchOutcome {
    let mut out = Vec::new();

    if args.len() == 1 {
        out.extend_from_slice(store.list_all().await.as_bytes());
    } else if args.len() >= 3 {
        match store.list_section(&args[1], &args[2]).await {
            Ok(rendered) => out.extend_from_slice(rendered.as_bytes()),
            Err(SectionLookupError::DocumentNotFound) => {
                out.extend_from_slice(b"[Error] Document not found.\n")
            }
            Err(SectionLookupError::SectionNotFound) => {
                out.extend_from_slice(b"[Error] Section not found.\n")
            }
        }
    }

    out.extend_from_slice(b"__END__\n");
    DispatchOutcome::Reply(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_splits_on_whitespace() {
        assert_eq!(parse_args("write doc1 intro"), vec!["write", "doc1", "intro"]);
    }

    #[test]
    fn parse_args_handles_tabs_and_repeated_spaces() {
        assert_eq!(parse_args("write  doc1\tintro"), vec!["write", "doc1", "intro"]);
    }

    #[test]
    fn parse_args_keeps_quoted_spans_together() {
        assert_eq!(
            parse_args(r#"create "my doc" 1 "section one""#),
            vec!["create", "my doc", "1", "section one"]
        );
    }

    #[test]
    fn parse_args_treats_unterminated_quote_as_absorbing_to_end() {
        assert_eq!(parse_args(r#"create "unterminated"#), vec!["create", "unterminated"]);
    }

    #[test]
    fn parse_args_of_empty_line_is_empty() {
        assert!(parse_args("").is_empty());
        assert!(parse_args("   ").is_empty());
    }

    fn bytes_of(outcome: DispatchOutcome) -> Vec<u8> {
        match outcome {
            DispatchOutcome::Reply(b) | DispatchOutcome::Close(b) => b,
            DispatchOutcome::EnterWrite { reply, .. } => reply,
        }
    }

    #[tokio::test]
    async fn create_with_valid_shape_succeeds() {
        let store = DocumentStore::new();
        let args = parse_args("create doc1 2 intro body");
        let reply = bytes_of(dispatch(&args, &store).await);
        assert_eq!(reply, b"[OK] Document created.\n");
    }

    #[tokio::test]
    async fn create_with_argc_count_mismatch_is_rejected() {
        let store = DocumentStore::new();
        let args = parse_args("create doc1 2 a b c");
        let reply = bytes_of(dispatch(&args, &store).await);
        assert_eq!(reply, b"[Error] Invalid section count or titles.\n");
        assert!(store.find("doc1").await.is_none());
    }

    #[tokio::test]
    async fn create_with_too_few_args_is_invalid_create_command() {
        let store = DocumentStore::new();
        let args = parse_args("create doc1");
        let reply = bytes_of(dispatch(&args, &store).await);
        assert_eq!(reply, b"[Error] Invalid create command.\n");
    }

    #[tokio::test]
    async fn create_duplicate_title_is_rejected() {
        let store = DocumentStore::new();
        dispatch(&parse_args("create doc1 1 a"), &store).await;
        let reply = bytes_of(dispatch(&parse_args("create doc1 1 b"), &store).await);
        assert_eq!(reply, b"[Error] Document already exists.\n");
    }

    #[tokio::test]
    async fn write_resolves_target_and_enters_write_mode() {
        let store = DocumentStore::new();
        dispatch(&parse_args("create doc1 1 intro"), &store).await;
        match dispatch(&parse_args("write doc1 intro"), &store).await {
            DispatchOutcome::EnterWrite { doc_index, section_index, reply } => {
                assert_eq!((doc_index, section_index), (0, 0));
                assert_eq!(reply, b"[OK] You can start writing. Send <END> to finish.\n>> ");
            }
            _ => panic!("expected EnterWrite"),
        }
    }

    #[tokio::test]
    async fn write_missing_document_is_rejected() {
        let store = DocumentStore::new();
        let reply = bytes_of(dispatch(&parse_args("write nope intro"), &store).await);
        assert_eq!(reply, b"[Error] Document not found.\n");
    }

    #[tokio::test]
    async fn write_missing_section_is_rejected() {
        let store = DocumentStore::new();
        dispatch(&parse_args("create doc1 1 intro"), &store).await;
        let reply = bytes_of(dispatch(&parse_args("write doc1 nosuch"), &store).await);
        assert_eq!(reply, b"[Error] Section not found.\n");
    }

    #[tokio::test]
    async fn read_with_no_args_ends_with_sentinel() {
        let store = DocumentStore::new();
        dispatch(&parse_args("create doc1 2 intro body"), &store).await;
        let reply = bytes_of(dispatch(&parse_args("read"), &store).await);
        assert_eq!(reply, b"doc1\n    1. intro\n    2. body\n__END__\n");
    }

    #[tokio::test]
    async fn read_missing_document_reports_error_then_sentinel() {
        let store = DocumentStore::new();
        let reply = bytes_of(dispatch(&parse_args("read doc_missing s"), &store).await);
        assert_eq!(reply, b"[Error] Document not found.\n__END__\n");
    }

    #[tokio::test]
    async fn bye_requests_connection_close() {
        let store = DocumentStore::new();
        match dispatch(&parse_args("bye"), &store).await {
            DispatchOutcome::Close(bytes) => assert_eq!(bytes, b"[Disconnected]\n"),
            _ => panic!("expected Close"),
        }
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let store = DocumentStore::new();
        let reply = bytes_of(dispatch(&parse_args("frobnicate"), &store).await);
        assert_eq!(reply, b"[Error] Unknown command.\n");
    }
}

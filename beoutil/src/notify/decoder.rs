use serde_json::Value;

/// Splits a byte stream of back-to-back JSON documents with no framing.
///
/// Bytes are pushed as they arrive off the wire and whole documents are
/// pulled out one at a time. A document may span any number of chunks.
#[derive(Debug, Default)]
pub struct DocumentDecoder {
    buf: Vec<u8>,
    /// Set while discarding the rest of a malformed document
    skipping: Option<Skip>,
}

/// Tracks nesting through a malformed document so that decoding resumes at
/// the next top-level `{`, never at an object nested inside the bad one.
#[derive(Debug, Default, Clone, Copy)]
struct Skip {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Skip {
    /// Advance over one byte; true if it opens a new top-level document
    fn boundary(&mut self, b: u8) -> bool {
        if self.in_string {
            match b {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return false;
        }

        match b {
            b'{' if self.depth == 0 => return true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => self.depth = self.depth.saturating_sub(1),
            b'"' => self.in_string = true,
            _ => {}
        }
        false
    }
}

impl DocumentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete document, or `None` when more input is needed.
    ///
    /// A malformed document is reported once. Everything up to the next
    /// top-level `{` is then discarded, across chunk boundaries if need be,
    /// so repeated calls always make progress.
    pub fn next_document(&mut self) -> Option<Result<Value, serde_json::Error>> {
        if !self.skip_to_boundary() {
            return None;
        }

        let (result, consumed) = {
            let mut documents = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            let result = documents.next();
            (result, documents.byte_offset())
        };

        match result {
            None => {
                // Only whitespace left
                self.buf.clear();
                None
            }
            Some(Ok(value)) => {
                self.buf.drain(..consumed);
                Some(Ok(value))
            }
            Some(Err(e)) if e.is_eof() => None,
            Some(Err(e)) => {
                self.start_skip();
                Some(Err(e))
            }
        }
    }

    /// True if buffered bytes hold the start of a document not yet complete
    pub fn has_partial(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Drop the first byte of the failed document and begin skipping
    fn start_skip(&mut self) {
        let mut skip = Skip::default();
        if let Some(&first) = self.buf.first() {
            if first == b'{' {
                skip.depth = 1;
            } else {
                skip.boundary(first);
            }
            self.buf.drain(..1);
        }
        self.skipping = Some(skip);
    }

    /// Discard bytes while skipping. False if the buffer ran out first.
    fn skip_to_boundary(&mut self) -> bool {
        let Some(skip) = self.skipping.as_mut() else {
            return true;
        };

        match self.buf.iter().position(|&b| skip.boundary(b)) {
            Some(pos) => {
                self.buf.drain(..pos);
                self.skipping = None;
                true
            }
            None => {
                self.buf.clear();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(decoder: &mut DocumentDecoder) -> Vec<Result<Value, String>> {
        std::iter::from_fn(|| decoder.next_document())
            .map(|r| r.map_err(|e| e.to_string()))
            .collect()
    }

    #[test]
    fn test_back_to_back_documents() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(br#"{"n":1}{"n":2}  {"n":3}"#);

        let docs = drain(&mut decoder);
        assert_eq!(docs, vec![Ok(json!({"n": 1})), Ok(json!({"n": 2})), Ok(json!({"n": 3}))]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_document_split_across_chunks() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(br#"{"notification": {"type": "VOL"#);
        assert!(decoder.next_document().is_none());
        assert!(decoder.has_partial());

        decoder.push(br#"UME"}}{"#);
        assert_eq!(
            decoder.next_document().unwrap().unwrap(),
            json!({"notification": {"type": "VOLUME"}})
        );
        assert!(decoder.next_document().is_none());

        decoder.push(br#""n":2}"#);
        assert_eq!(decoder.next_document().unwrap().unwrap(), json!({"n": 2}));
    }

    #[test]
    fn test_whitespace_only_needs_more_input() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(b"\r\n  \n");
        assert!(decoder.next_document().is_none());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_malformed_document_is_skipped() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(br#"{"a": tru} garbage {"b":2}"#);

        let docs = drain(&mut decoder);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].is_err());
        assert_eq!(docs[1], Ok(json!({"b": 2})));
    }

    #[test]
    fn test_garbage_without_recovery_point_is_consumed() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(b"]]]]");

        assert!(decoder.next_document().unwrap().is_err());
        assert!(decoder.next_document().is_none());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_nested_object_in_malformed_document_is_not_emitted() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(br#"{"notification": {"type": "X", "data": {"a":1}}, oops}{"b":2}"#);

        let docs = drain(&mut decoder);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].is_err());
        assert_eq!(docs[1], Ok(json!({"b": 2})));
    }

    #[test]
    fn test_skip_continues_across_chunks() {
        let mut decoder = DocumentDecoder::new();
        decoder.push(br#"{"n": {"type": x, "#);
        assert!(decoder.next_document().unwrap().is_err());
        assert!(decoder.next_document().is_none());

        decoder.push(br#""s": "{not a doc}", "d": {"a":1}}}"#);
        assert!(decoder.next_document().is_none());

        decoder.push(br#"{"b":2}"#);
        assert_eq!(decoder.next_document().unwrap().unwrap(), json!({"b": 2}));
        assert!(decoder.next_document().is_none());
    }
}

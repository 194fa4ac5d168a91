use rustc_hash::FxHashMap;

use crate::error::CodecError;

/// Initial accumulator capacity is capped so a hostile head declaring a huge
///  total cannot reserve it all up front; the buffer grows with actual chunks
///  and the overrun check bounds it by the declared total.
const MAX_UPFRONT_CAPACITY: usize = 1 << 20;

/// One in-flight multipart payload: what the head declared, what has arrived
///  so far, plus head metadata that the finished packet needs back (the
///  address for requests, the ok flag for responses).
struct Partial<T> {
    meta: T,
    declared: usize,
    accumulated: Vec<u8>,
}

/// Per-connection map from in-flight session id to its partial payload.
///
/// Owned by exactly one connection agent, so it needs no locking; dropping
///  the table (when the connection dies) discards all partial payloads.
pub struct ReassemblyTable<T> {
    entries: FxHashMap<u32, Partial<T>>,
}

impl<T> Default for ReassemblyTable<T> {
    fn default() -> Self {
        ReassemblyTable { entries: FxHashMap::default() }
    }
}

impl<T> ReassemblyTable<T> {
    /// Open an accumulator for a head packet. A head for a session that is
    ///  already open replaces the stale entry: session reuse before the tail
    ///  is a peer bug, and the fresh request wins.
    pub fn begin(&mut self, session: u32, meta: T, declared: usize) {
        self.entries.insert(session, Partial {
            meta,
            declared,
            accumulated: Vec::with_capacity(declared.min(MAX_UPFRONT_CAPACITY)),
        });
    }

    /// Append a body chunk to an open accumulator.
    pub fn append(&mut self, session: u32, chunk: &[u8]) -> Result<(), CodecError> {
        let partial = self.entries.get_mut(&session)
            .ok_or(CodecError::UnknownSession(session))?;

        if partial.accumulated.len() + chunk.len() > partial.declared {
            let declared = partial.declared;
            let got = partial.accumulated.len() + chunk.len();
            self.entries.remove(&session);
            return Err(CodecError::InvalidFraming(format!(
                "multipart overrun for session {} ({} bytes declared, {} received)",
                session, declared, got
            )));
        }

        partial.accumulated.extend_from_slice(chunk);
        Ok(())
    }

    /// Append the tail chunk, close the accumulator, and hand back the head
    ///  metadata together with the complete payload.
    pub fn finish(&mut self, session: u32, chunk: &[u8]) -> Result<(T, Vec<u8>), CodecError> {
        self.append(session, chunk)?;
        let partial = self.entries.remove(&session)
            .expect("append just verified the entry exists");
        Ok((partial.meta, partial.accumulated))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_bodies_tail() {
        let mut table = ReassemblyTable::default();
        table.begin(7, "meta", 10);

        table.append(7, b"0123").unwrap();
        table.append(7, b"4567").unwrap();
        let (meta, payload) = table.finish(7, b"89").unwrap();

        assert_eq!(meta, "meta");
        assert_eq!(payload, b"0123456789");
        assert!(table.is_empty());
    }

    #[test]
    fn test_body_without_head() {
        let mut table = ReassemblyTable::<()>::default();
        assert_eq!(table.append(99, b"xx"), Err(CodecError::UnknownSession(99)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_tail_without_head() {
        let mut table = ReassemblyTable::<()>::default();
        assert_eq!(
            table.finish(99, b"xx").unwrap_err(),
            CodecError::UnknownSession(99)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_overrun_discards_entry() {
        let mut table = ReassemblyTable::default();
        table.begin(3, (), 4);

        let err = table.append(3, b"012345").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFraming(_)));
        assert!(table.is_empty(), "an overrun entry must not linger");
    }

    #[test]
    fn test_exact_fill_is_not_an_overrun() {
        let mut table = ReassemblyTable::default();
        table.begin(3, (), 4);
        let (_, payload) = table.finish(3, b"0123").unwrap();
        assert_eq!(payload, b"0123");
    }

    #[test]
    fn test_duplicate_head_replaces_entry() {
        let mut table = ReassemblyTable::default();
        table.begin(5, 'a', 8);
        table.append(5, b"old").unwrap();

        table.begin(5, 'b', 4);
        let (meta, payload) = table.finish(5, b"new!").unwrap();
        assert_eq!(meta, 'b');
        assert_eq!(payload, b"new!");
    }

    #[test]
    fn test_independent_sessions() {
        let mut table = ReassemblyTable::default();
        table.begin(1, (), 2);
        table.begin(2, (), 2);
        assert_eq!(table.len(), 2);

        table.append(1, b"a").unwrap();
        let (_, payload) = table.finish(2, b"bb").unwrap();
        assert_eq!(payload, b"bb");
        assert_eq!(table.len(), 1);
    }
}

use sb_core::{HostMap, HostValue};

/// Per-document field access the host plugs into a search handle.
///
/// The lookup is positioned by the host through the hook methods; `get` answers
/// for the current document.
pub trait DocumentLookup {
    /// Index segment reader handed over by the host.
    type Reader;
    type Scorer;

    fn get(&self, key: &str) -> Option<HostValue>;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn keys(&self) -> Vec<String>;

    fn set_next_reader(&mut self, _reader: Self::Reader) {}

    fn set_scorer(&mut self, _scorer: Self::Scorer) {}

    fn set_next_doc_id(&mut self, _doc_id: u32) {}

    fn set_next_source(&mut self, _source: HostMap) {}
}

/// Lookup with no entries, used by executable handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl DocumentLookup for NoLookup {
    type Reader = ();
    type Scorer = ();

    fn get(&self, _key: &str) -> Option<HostValue> {
        None
    }

    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

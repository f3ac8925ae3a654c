//! Format identification and construction.
//!
//! Each supported format registers an [`ArchiveType`] plugin that can
//! sniff a stream, open or create archives, and declare any sidecar files
//! the format keeps its table in.  [`FormatRegistry`] holds the plugin
//! set; there is no process-wide registry, callers build or take the
//! [`FormatRegistry::standard`] one and pass it around.

use crate::archive::Archive;
use crate::error::Result;
use seg_stream::Stream;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// How confident a sniff is that a stream is in a given format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Certainty {
    DefinitelyNo,
    /// The format has no signature to check.
    Unsure,
    /// Structure checks passed but there is no signature.
    PossiblyYes,
    /// Signature matched.
    DefinitelyYes,
}

/// Role of a supplementary (sidecar) file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppItem {
    /// The file holding the external file table.
    Fat,
    Palette,
    Dictionary,
}

/// Opened sidecar streams, keyed by role.
pub type SuppData = HashMap<SuppItem, Box<dyn Stream>>;

/// Sidecar filenames a format wants opened, keyed by role.
pub type SuppFilenames = HashMap<SuppItem, String>;

/// A format plugin.
pub trait ArchiveType {
    /// Short stable identifier, e.g. `"wad-doom"`.
    fn code(&self) -> &'static str;

    fn friendly_name(&self) -> &'static str;

    fn file_extensions(&self) -> &'static [&'static str];

    fn games(&self) -> &'static [&'static str];

    /// Bounded sniff of signature bytes and basic structural sanity.
    /// Must not modify the stream.
    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty>;

    /// Parse an existing archive.
    fn open(&self, content: Box<dyn Stream>, supps: SuppData) -> Result<Box<dyn Archive>>;

    /// Write a new, empty archive into the stream and open it.
    fn create(&self, content: Box<dyn Stream>, supps: SuppData) -> Result<Box<dyn Archive>>;

    /// Sidecar files needed to open `filename`, if any.
    fn required_supps(
        &self,
        _content: &mut dyn Stream,
        _filename: &str,
    ) -> Result<SuppFilenames> {
        Ok(SuppFilenames::new())
    }
}

/// The set of known format plugins.
#[derive(Default, Clone)]
pub struct FormatRegistry {
    types: Vec<Rc<dyn ArchiveType>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, format: Rc<dyn ArchiveType>) {
        self.types.push(format);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn ArchiveType>> {
        self.types.iter()
    }

    pub fn by_code(&self, code: &str) -> Option<Rc<dyn ArchiveType>> {
        self.types.iter().find(|t| t.code() == code).cloned()
    }

    /// Sniff `content` against every registered format and return the most
    /// confident match, if any.  A `DefinitelyYes` wins immediately; ties
    /// go to registration order.
    pub fn identify(&self, content: &mut dyn Stream) -> Result<Option<Rc<dyn ArchiveType>>> {
        let mut best: Option<(Certainty, Rc<dyn ArchiveType>)> = None;
        for t in &self.types {
            let c = t.is_instance(content)?;
            debug!(format = t.code(), certainty = ?c, "sniffed");
            if c == Certainty::DefinitelyYes {
                return Ok(Some(Rc::clone(t)));
            }
            if c != Certainty::DefinitelyNo
                && best.as_ref().is_none_or(|(bc, _)| c > *bc)
            {
                best = Some((c, Rc::clone(t)));
            }
        }
        Ok(best.map(|(_, t)| t))
    }

    /// All bundled formats, wired to the standard filter table.
    pub fn standard() -> Self {
        let filters = Rc::new(crate::filters::standard_filters());
        let mut reg = Self::new();
        reg.register(Rc::new(crate::formats::wad::WadType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::grp::GrpType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::pod::PodType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::epf::EpfType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::rff::RffType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::bash::BashType::new(Rc::clone(&filters))));
        reg.register(Rc::new(crate::formats::stellar7::Stellar7Type::new(Rc::clone(
            &filters,
        ))));
        reg.register(Rc::new(crate::formats::doofus::DoofusType::new(filters)));
        reg
    }
}

use crate::types::{PipelineError, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Stop after this many parse errors in a row; the stream is not recovering.
const MAX_CONSECUTIVE_ERRORS: usize = 50;

const READ_BUFFER_BYTES: usize = 1 << 20;

/// One `<page>` of the main namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPage {
    pub title: String,
    pub ns: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Ns,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub pages: u64,
    pub other_namespaces: u64,
    pub malformed: u64,
}

/// Streams pages out of a MediaWiki export, one at a time.
pub struct DumpReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    stats: ReaderStats,
}

impl DumpReader<Box<dyn BufRead>> {
    /// Open a dump; `.bz2` files (including multistream) are decompressed on the fly.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::MissingReference {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        let compressed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bz2"));

        let inner: Box<dyn BufRead> = if compressed {
            debug!("Reading bz2 dump {}", path.display());
            Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, MultiBzDecoder::new(file)))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, file))
        };
        Ok(Self::from_reader(inner))
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn from_reader(inner: R) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Next main-namespace page, or `None` at the end of the dump.
    ///
    /// A page whose markup cannot be parsed is logged and dropped; only a run
    /// of errors with no page in between is returned as an error.
    pub fn next_page(&mut self) -> Result<Option<DumpPage>> {
        let mut consecutive_errors = 0;
        let mut in_page = false;
        let mut field: Option<Field> = None;
        let mut title = String::new();
        let mut ns = String::new();
        let mut text = String::new();

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    consecutive_errors += 1;
                    self.stats.malformed += 1;
                    warn!(
                        "Skipping malformed dump record near byte {}: {}",
                        self.reader.buffer_position(),
                        e
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(PipelineError::DumpParse(format!(
                            "{} consecutive parse errors, last: {}",
                            consecutive_errors, e
                        )));
                    }
                    in_page = false;
                    field = None;
                    continue;
                }
            };

            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"page" => {
                        in_page = true;
                        field = None;
                        title.clear();
                        ns.clear();
                        text.clear();
                    }
                    b"title" if in_page => field = Some(Field::Title),
                    b"ns" if in_page => field = Some(Field::Ns),
                    b"text" if in_page => field = Some(Field::Text),
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(target) = field {
                        let unescaped = t
                            .unescape()
                            .map_err(|e| PipelineError::DumpParse(e.to_string()));
                        match unescaped {
                            Ok(s) => match target {
                                Field::Title => title.push_str(&s),
                                Field::Ns => ns.push_str(&s),
                                Field::Text => text.push_str(&s),
                            },
                            Err(e) => {
                                warn!("Dropping undecodable text in page {:?}: {}", title, e);
                                self.stats.malformed += 1;
                                in_page = false;
                                field = None;
                            }
                        }
                    }
                }
                Event::CData(c) => {
                    if field == Some(Field::Text) {
                        text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"title" | b"ns" | b"text" => field = None,
                    b"page" if in_page => {
                        in_page = false;
                        consecutive_errors = 0;
                        let namespace = match ns.trim() {
                            "" => 0,
                            value => match value.parse::<i64>() {
                                Ok(n) => n,
                                Err(_) => {
                                    warn!("Page {:?} has unreadable namespace {:?}", title, value);
                                    self.stats.malformed += 1;
                                    continue;
                                }
                            },
                        };
                        if namespace != 0 {
                            self.stats.other_namespaces += 1;
                            continue;
                        }
                        let page_title = title.trim();
                        if page_title.is_empty() {
                            self.stats.malformed += 1;
                            continue;
                        }
                        self.stats.pages += 1;
                        return Ok(Some(DumpPage {
                            title: page_title.to_string(),
                            ns: namespace,
                            text: std::mem::take(&mut text),
                        }));
                    }
                    _ => {}
                },
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for DumpReader<R> {
    type Item = Result<DumpPage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

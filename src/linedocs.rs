// Line-oriented document feed
// One document per line, tab-separated `title <TAB> date <TAB> body`, with an
// optional header line. Records are handed out under a lock so each line goes
// to exactly one ingest worker; parsing happens outside the lock against the
// worker's own scratch context.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Timelike};
use parking_lot::Mutex;

use crate::contracts::{DocContext, DocRecord, RecordSource};
use crate::observability::{bump, Counter};

const SEP: char = '\t';
const HEADER_INDICATOR: &str = "FIELDS_HEADER_INDICATOR";
const EXPECTED_HEADER: &str = "FIELDS_HEADER_INDICATOR###\tdoctitle\tdocdate\tbody";
const READ_BUFFER: usize = 1 << 16;

/// Feed of line documents from a UTF-8 file.
pub struct LineDocSource {
    path: PathBuf,
    repeat: bool,
    facet_dates: bool,
    bytes_read: AtomicU64,
    inner: Mutex<Reader>,
}

struct Reader {
    lines: std::io::Lines<BufReader<File>>,
    read_count: u64,
}

impl LineDocSource {
    /// Open the feed. `repeat` restarts from the top on exhaustion;
    /// `facet_dates` attaches a `Date/yyyy/mm/dd` taxonomy path to each
    /// record.
    pub fn open(path: impl AsRef<Path>, repeat: bool, facet_dates: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lines = open_reader(&path)?;
        Ok(Self {
            path,
            repeat,
            facet_dates,
            bytes_read: AtomicU64::new(0),
            inner: Mutex::new(Reader {
                lines,
                read_count: 0,
            }),
        })
    }

    /// Documents handed out so far.
    pub fn read_count(&self) -> u64 {
        self.inner.lock().read_count
    }
}

fn open_reader(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open line docs file: {}", path.display()))?;
    let mut lines = BufReader::with_capacity(READ_BUFFER, file).lines();

    // Peek the first line: a header is skipped, anything else is data and we
    // reopen to put it back.
    match lines.next() {
        Some(first) => {
            let first = first?;
            if first.starts_with(HEADER_INDICATOR) {
                if first.trim() != EXPECTED_HEADER {
                    bail!(
                        "unrecognized header in line docs file {}: {}",
                        path.display(),
                        first.trim()
                    );
                }
                Ok(lines)
            } else {
                let file = File::open(path)?;
                Ok(BufReader::with_capacity(READ_BUFFER, file).lines())
            }
        }
        None => Ok(lines),
    }
}

impl RecordSource for LineDocSource {
    fn next_record(&self, ctx: &mut DocContext) -> Result<Option<DocRecord>> {
        // Line hand-out and ordinal assignment are mutually exclusive; the
        // parse below runs unlocked.
        let (line, ord) = {
            let mut reader = self.inner.lock();
            let line = match reader.lines.next().transpose()? {
                Some(line) => line,
                None => {
                    if self.repeat {
                        reader.lines = open_reader(&self.path)?;
                        match reader.lines.next().transpose()? {
                            Some(line) => line,
                            None => return Ok(None),
                        }
                    } else {
                        return Ok(None);
                    }
                }
            };
            let ord = reader.read_count;
            reader.read_count += 1;
            (line, ord)
        };

        self.bytes_read
            .fetch_add(line.len() as u64, Ordering::Relaxed);
        bump(Counter::BytesIngested, line.len() as u64);

        parse_line(&line, ord, self.facet_dates, ctx).map(Some)
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

fn parse_line(line: &str, ord: u64, facet_dates: bool, ctx: &mut DocContext) -> Result<DocRecord> {
    let Some(spot) = line.find(SEP) else {
        bail!("line: [{line}] is in an invalid format");
    };
    let Some(rel) = line[spot + 1..].find(SEP) else {
        bail!("line: [{line}] is in an invalid format");
    };
    let spot2 = spot + 1 + rel;

    let title = &line[..spot];
    let date_str = &line[spot + 1..spot2];
    let body = &line[spot2 + 1..];

    let date = NaiveDateTime::parse_from_str(date_str, "%d-%b-%Y %H:%M:%S")
        .with_context(|| format!("failed to parse date '{date_str}' in line docs file"))?;
    let time_sec = date.hour() * 3600 + date.minute() * 60 + date.second();

    let facet_paths = if facet_dates {
        ctx.path_buf.clear();
        ctx.path_buf.push("Date".to_string());
        ctx.path_buf.push(date.format("%Y").to_string());
        ctx.path_buf.push(date.format("%m").to_string());
        ctx.path_buf.push(date.format("%d").to_string());
        vec![ctx.path_buf.clone()]
    } else {
        Vec::new()
    };

    ctx.parsed += 1;

    Ok(DocRecord {
        pk: int_to_pk(ord),
        ord,
        title: title.to_string(),
        date: date_str.to_string(),
        date_msec: date.and_utc().timestamp_millis(),
        time_sec,
        body: body.to_string(),
        facet_paths,
    })
}

/// Width of every primary key: base-36, zero padded (6 digits spans 2.2B).
pub const PK_WIDTH: usize = 6;

/// Encode an ordinal as a base-36 primary key, zero padded to [`PK_WIDTH`].
pub fn int_to_pk(mut id: u64) -> String {
    let mut digits = Vec::with_capacity(PK_WIDTH);
    loop {
        let digit = (id % 36) as u8;
        digits.push(if digit < 10 {
            b'0' + digit
        } else {
            b'a' + (digit - 10)
        });
        id /= 36;
        if id == 0 {
            break;
        }
    }
    while digits.len() < PK_WIDTH {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8(digits).expect("base-36 digits are ASCII")
}

/// Decode a base-36 primary key back to its ordinal.
pub fn pk_to_int(pk: &str) -> Result<u64> {
    let mut accum: u64 = 0;
    for ch in pk.chars() {
        let digit = match ch {
            '0'..='9' => ch as u64 - '0' as u64,
            'a'..='z' => 10 + ch as u64 - 'a' as u64,
            _ => bail!("invalid base-36 primary key: {pk}"),
        };
        accum = accum * 36 + digit;
    }
    Ok(accum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_docs(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_pk_round_trip() {
        for id in [0, 1, 35, 36, 12345, 2_000_000_000] {
            let pk = int_to_pk(id);
            assert_eq!(pk.len(), PK_WIDTH);
            assert_eq!(pk_to_int(&pk).unwrap(), id);
        }
        assert_eq!(int_to_pk(0), "000000");
        assert_eq!(int_to_pk(35), "00000z");
        assert_eq!(int_to_pk(36), "000010");
    }

    #[test]
    fn test_reads_and_assigns_ordinals() {
        let file = write_docs(&[
            "First Title\t13-OCT-2006 10:04:32\tbody one here",
            "Second Title\t01-JAN-2008 23:59:59\tbody two here",
        ]);
        let source = LineDocSource::open(file.path(), false, false).unwrap();
        let mut ctx = DocContext::default();

        let a = source.next_record(&mut ctx).unwrap().unwrap();
        assert_eq!(a.ord, 0);
        assert_eq!(a.pk, "000000");
        assert_eq!(a.title, "First Title");
        assert_eq!(a.body, "body one here");
        assert_eq!(a.time_sec, 10 * 3600 + 4 * 60 + 32);

        let b = source.next_record(&mut ctx).unwrap().unwrap();
        assert_eq!(b.ord, 1);
        assert!(source.next_record(&mut ctx).unwrap().is_none());
        assert!(source.bytes_read() > 0);
    }

    #[test]
    fn test_header_is_skipped() {
        let file = write_docs(&[
            EXPECTED_HEADER,
            "Title\t13-OCT-2006 10:04:32\tbody",
        ]);
        let source = LineDocSource::open(file.path(), false, false).unwrap();
        let mut ctx = DocContext::default();
        let rec = source.next_record(&mut ctx).unwrap().unwrap();
        assert_eq!(rec.title, "Title");
        assert!(source.next_record(&mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_unknown_header_is_fatal() {
        let file = write_docs(&["FIELDS_HEADER_INDICATOR###\tsomething\telse"]);
        assert!(LineDocSource::open(file.path(), false, false).is_err());
    }

    #[test]
    fn test_repeat_mode_restarts() {
        let file = write_docs(&["Title\t13-OCT-2006 10:04:32\tbody"]);
        let source = LineDocSource::open(file.path(), true, false).unwrap();
        let mut ctx = DocContext::default();

        for expected_ord in 0..5u64 {
            let rec = source.next_record(&mut ctx).unwrap().unwrap();
            // Ordinals keep increasing across restarts.
            assert_eq!(rec.ord, expected_ord);
        }
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let file = write_docs(&["no tabs at all"]);
        let source = LineDocSource::open(file.path(), false, false).unwrap();
        let mut ctx = DocContext::default();
        assert!(source.next_record(&mut ctx).is_err());
    }

    #[test]
    fn test_facet_date_path() {
        let file = write_docs(&["Title\t13-OCT-2006 10:04:32\tbody"]);
        let source = LineDocSource::open(file.path(), false, true).unwrap();
        let mut ctx = DocContext::default();
        let rec = source.next_record(&mut ctx).unwrap().unwrap();
        assert_eq!(
            rec.facet_paths,
            vec![vec![
                "Date".to_string(),
                "2006".to_string(),
                "10".to_string(),
                "13".to_string()
            ]]
        );
    }
}

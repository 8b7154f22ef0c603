//! HTML bucket listings.
//!
//! A mount root is served as an HTML table of every object in the bucket,
//! rendered once at open time and held in memory. The rendered page is
//! wrapped in a file handle with the same read and seek semantics as an
//! object handle, so the serving layer treats both uniformly.

use std::fmt::Write as _;
use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::store::ObjectEntry;
use crate::utils::{encode_key_for_href, html_escape};
use super::FsError;

/// Bucket enumerations larger than this are silently truncated; the page
/// shows the first keys only.
pub const MAX_LIST_KEYS: usize = 100_000;

const LISTING_STYLE: &str = "\
table {
  font-family: arial, sans-serif;
  border-collapse: collapse;
  width: 100%;
  padding: 0;
  margin: 0;
  border: 1px solid #ddd;
}

td {
  padding-top: 0.1em;
  padding-bottom: 0.1em;
  padding-left: 0.5em;
  padding-right: 0.5em;
}

tr:nth-child(even) {
  background-color: #dddddd;
}
td.name {
  text-align: left;
}

td.md {
  text-align: right;
}";

/// Render the listing page for one mount.
pub fn render_listing(
    bucket_name: &str,
    mount_name: &str,
    entries: &[ObjectEntry],
) -> Result<String, FsError> {
    let mut page = String::new();
    let title = html_escape(bucket_name);

    writeln!(page, "<!DOCTYPE html>")?;
    writeln!(page, "<html>")?;
    writeln!(page, "<head>")?;
    writeln!(page, "<title>{}</title>", title)?;
    writeln!(page, "<style>\n{}\n</style>", LISTING_STYLE)?;
    writeln!(page, "</head>")?;
    writeln!(page, "<body>")?;
    writeln!(page, "<h2>{}</h2>", title)?;
    writeln!(page, "<table>")?;

    for entry in entries {
        let href = format!(
            "/{}/{}",
            encode_key_for_href(mount_name),
            encode_key_for_href(&entry.key)
        );
        let modified = entry
            .modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        writeln!(page, "  <tr>")?;
        writeln!(
            page,
            "    <td class=\"name\"><a href=\"{}\">{}</a></td>",
            href,
            html_escape(&entry.key)
        )?;
        writeln!(page, "    <td class=\"md\">{}</td>", html_escape(&modified))?;
        writeln!(page, "  </tr>")?;
    }

    writeln!(page, "</table>")?;
    writeln!(page, "</body>")?;
    writeln!(page, "</html>")?;

    Ok(page)
}

/// A fully rendered listing page behind a seekable read handle.
pub struct ListingFile {
    data: Bytes,
    pos: u64,
    modified: Option<DateTime<Utc>>,
}

impl ListingFile {
    pub fn new(page: String) -> Self {
        Self {
            data: Bytes::from(page),
            pos: 0,
            modified: Some(Utc::now()),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }
}

impl AsyncRead for ListingFile {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let pos = this.pos as usize;
        if pos >= this.data.len() {
            return Poll::Ready(Ok(()));
        }

        let n = buf.remaining().min(this.data.len() - pos);
        buf.put_slice(&this.data[pos..pos + n]);
        this.pos += n as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for ListingFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        let this = self.get_mut();
        let size = this.data.len() as i128;

        let target = match position {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => this.pos as i128 + delta as i128,
            SeekFrom::End(delta) => size + delta as i128,
        };

        if target < 0 || target > size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek outside listing bounds",
            ));
        }

        this.pos = target as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

//! Common utility code for noodles: region reading from tabix-indexed TSV shards.

use std::{
    fs::File,
    io::{self, BufRead},
    path::{Path, PathBuf},
};

use noodles_bgzf as bgzf;
use noodles_core::{region::Interval, Position};
use noodles_csi::{self as csi, binning_index::index::reference_sequence::bin::Chunk, BinningIndex};
use noodles_tabix as tabix;

use super::{
    canonicalize_chrom, contig_names,
    io::{open_read_maybe_gz, trim_line_end},
};

/// 0-based column indices of the coordinate columns of a TSV shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsvColumns {
    /// Column with the chromosome name.
    pub chrom: usize,
    /// Column with the 1-based position.
    pub pos: usize,
}

/// Rows to fetch from one shard.
///
/// The window is 0-based and half-open, so a row with 1-based position `pos`
/// is returned iff `begin < pos <= end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRequest {
    /// Canonical chromosome name.
    pub chrom: String,
    /// 0-based begin position, inclusive.
    pub begin: u64,
    /// 0-based end position, exclusive.
    pub end: u64,
    /// Number of header lines at the start of the file.
    pub header_skip: usize,
    /// Coordinate columns.
    pub columns: TsvColumns,
}

/// Outcome of checking one line against the request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Line lies in the window.
    Inside,
    /// Line lies before the window or on another contig.
    Outside,
    /// Line lies behind the window on the requested contig.
    Behind,
}

impl RegionRequest {
    /// Place `line` relative to the window.
    ///
    /// Lines whose coordinates cannot be read are reported as inside so that
    /// the record parser gets to see (and reject) them.
    fn place(&self, line: &str) -> Placement {
        let mut chrom = None;
        let mut pos = None;
        for (i, field) in line.split('\t').enumerate() {
            if i == self.columns.chrom {
                chrom = Some(field);
            }
            if i == self.columns.pos {
                pos = Some(field);
            }
        }
        let (Some(chrom), Some(pos)) = (chrom, pos) else {
            return Placement::Inside;
        };
        if canonicalize_chrom(chrom) != self.chrom {
            return Placement::Outside;
        }
        match pos.parse::<u64>() {
            Ok(pos) if pos > self.end => Placement::Behind,
            Ok(pos) if pos > self.begin => Placement::Inside,
            Ok(_) => Placement::Outside,
            Err(_) => Placement::Inside,
        }
    }
}

/// Path of the tabix index belonging to `path`.
pub fn tbi_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut result = path.as_ref().as_os_str().to_owned();
    result.push(".tbi");
    PathBuf::from(result)
}

/// Lines of one shard falling into a `RegionRequest`.
pub enum RegionRows {
    /// Read through the tabix index.
    Indexed(IndexedRows),
    /// Linear scan of a file without index.
    Scan(ScanRows),
}

impl std::fmt::Debug for RegionRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionRows::Indexed(_) => write!(f, "RegionRows::Indexed"),
            RegionRows::Scan(_) => write!(f, "RegionRows::Scan"),
        }
    }
}

impl Iterator for RegionRows {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RegionRows::Indexed(rows) => rows.next(),
            RegionRows::Scan(rows) => rows.next(),
        }
    }
}

/// Open the rows of the shard at `path` that fall into `request`.
///
/// Returns `Ok(None)` if the shard does not exist.  The tabix index at
/// `${path}.tbi` is used if present, otherwise the file is scanned.
pub fn open_region<P: AsRef<Path>>(
    path: P,
    request: &RegionRequest,
) -> Result<Option<RegionRows>, io::Error> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::debug!("shard {:?} does not exist", path);
        return Ok(None);
    }

    let path_tbi = tbi_path(path);
    if path_tbi.exists() {
        tracing::trace!("reading {:?} through index {:?}", path, &path_tbi);
        Ok(Some(RegionRows::Indexed(IndexedRows::new(
            path, &path_tbi, request,
        )?)))
    } else {
        tracing::trace!("no index for {:?}, scanning", path);
        Ok(Some(RegionRows::Scan(ScanRows::new(path, request)?)))
    }
}

/// Region rows read through a tabix index.
pub struct IndexedRows {
    reader: bgzf::Reader<File>,
    /// Remaining chunks, as `(start, end)` virtual positions.
    chunks: std::vec::IntoIter<(bgzf::VirtualPosition, bgzf::VirtualPosition)>,
    /// End of the chunk that is currently read.
    chunk_end: Option<bgzf::VirtualPosition>,
    /// Virtual position of the first line after the header.
    data_start: bgzf::VirtualPosition,
    request: RegionRequest,
    buf: String,
}

impl IndexedRows {
    fn new(path: &Path, path_tbi: &Path, request: &RegionRequest) -> Result<Self, io::Error> {
        let index = tabix::read(path_tbi)?;

        let mut reader = File::open(path).map(bgzf::Reader::new)?;
        let mut buf = String::new();
        for _ in 0..request.header_skip {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
        }
        let data_start = reader.virtual_position();

        let chunks = match Self::reference_sequence_id(&index, &request.chrom)? {
            Some(ref_id) => {
                let to_position = |pos: u64| {
                    Position::try_from(pos as usize)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
                };
                let start = to_position(request.begin + 1)?;
                let end = to_position(std::cmp::max(request.end, request.begin + 1))?;
                index
                    .query(ref_id, Interval::from(start..=end))?
                    .into_iter()
                    .map(|chunk| (chunk.start(), chunk.end()))
                    .collect::<Vec<_>>()
            }
            None => {
                tracing::debug!("contig {} not in index {:?}", &request.chrom, path_tbi);
                Vec::new()
            }
        };

        Ok(Self {
            reader,
            chunks: chunks.into_iter(),
            chunk_end: None,
            data_start,
            request: request.clone(),
            buf,
        })
    }

    /// Look up the index of the contig, trying all names the canonical
    /// chromosome may be stored under.
    fn reference_sequence_id(index: &tabix::Index, chrom: &str) -> Result<Option<usize>, io::Error> {
        let header = index
            .header()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "tabix index without header"))?;
        let names = header.reference_sequence_names();
        Ok(contig_names(chrom)
            .iter()
            .find_map(|wanted| names.iter().position(|name| name == wanted)))
    }
}

impl Iterator for IndexedRows {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk_end = match self.chunk_end {
                Some(chunk_end) => chunk_end,
                None => {
                    let (chunk_start, chunk_end) = self.chunks.next()?;
                    if let Err(e) = self.reader.seek(chunk_start) {
                        return Some(Err(e));
                    }
                    self.chunk_end = Some(chunk_end);
                    chunk_end
                }
            };

            let line_start = self.reader.virtual_position();
            if line_start >= chunk_end {
                self.chunk_end = None;
                continue;
            }

            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.chunk_end = None;
                    continue;
                }
                Ok(_) => (),
                Err(e) => return Some(Err(e)),
            }
            if line_start < self.data_start || self.buf.starts_with('#') {
                continue;
            }
            trim_line_end(&mut self.buf);

            match self.request.place(&self.buf) {
                Placement::Inside => return Some(Ok(self.buf.clone())),
                Placement::Outside => continue,
                Placement::Behind => {
                    // The remaining chunks can only hold rows behind the window.
                    self.chunk_end = None;
                    self.chunks = Vec::new().into_iter();
                    return None;
                }
            }
        }
    }
}

/// Region rows found by scanning the whole file.
pub struct ScanRows {
    reader: Box<dyn BufRead>,
    request: RegionRequest,
    done: bool,
}

impl ScanRows {
    fn new(path: &Path, request: &RegionRequest) -> Result<Self, io::Error> {
        let mut reader = open_read_maybe_gz(path)?;
        let mut buf = String::new();
        for _ in 0..request.header_skip {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
        }
        Ok(Self {
            reader,
            request: request.clone(),
            done: false,
        })
    }
}

impl Iterator for ScanRows {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = String::new();
        while !self.done {
            buf.clear();
            match self.reader.read_line(&mut buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if buf.starts_with('#') {
                        continue;
                    }
                    trim_line_end(&mut buf);
                    match self.request.place(&buf) {
                        Placement::Inside => return Some(Ok(buf)),
                        Placement::Outside => (),
                        Placement::Behind => self.done = true,
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Tabix header of a generic TSV shard, columns are 1-based in the index.
fn tsv_index_header(
    header_skip: usize,
    columns: TsvColumns,
) -> Result<csi::binning_index::index::Header, anyhow::Error> {
    let line_skip_count = u32::try_from(header_skip)
        .map_err(|e| anyhow::anyhow!("invalid header line count {}: {}", header_skip, e))?;
    Ok(csi::binning_index::index::header::Builder::default()
        .set_format(csi::binning_index::index::header::Format::Generic(
            csi::binning_index::index::header::format::CoordinateSystem::Gff,
        ))
        .set_reference_sequence_name_index(columns.chrom + 1)
        .set_start_position_index(columns.pos + 1)
        .set_end_position_index(Some(columns.pos + 1))
        .set_line_comment_prefix(b'#')
        .set_line_skip_count(line_skip_count)
        .build())
}

/// Build TBI for the coordinate-sorted BGZF TSV file at `path_src` and write to `path_dst`.
pub fn build_tbi<S, D>(
    path_src: S,
    path_dst: D,
    header_skip: usize,
    columns: TsvColumns,
) -> Result<(), anyhow::Error>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    let mut reader = File::open(path_src.as_ref())
        .map(bgzf::Reader::new)
        .map_err(|e| anyhow::anyhow!("error opening input file for tbi creation: {}", e))?;

    let mut indexer = tabix::index::Indexer::default();
    indexer.set_header(tsv_index_header(header_skip, columns)?);

    let mut line = String::new();
    for _ in 0..header_skip {
        line.clear();
        reader
            .read_line(&mut line)
            .map_err(|e| anyhow::anyhow!("problem reading header line: {}", e))?;
    }

    let mut start_position = reader.virtual_position();
    loop {
        line.clear();
        if reader
            .read_line(&mut line)
            .map_err(|e| anyhow::anyhow!("problem reading line: {}", e))?
            == 0
        {
            break;
        }
        let end_position = reader.virtual_position();
        let chunk = Chunk::new(start_position, end_position);

        trim_line_end(&mut line);
        let fields = line.split('\t').collect::<Vec<_>>();
        let (chrom, pos) = match (fields.get(columns.chrom), fields.get(columns.pos)) {
            (Some(chrom), Some(pos)) => (*chrom, *pos),
            _ => anyhow::bail!("line without coordinate columns: {:?}", &line),
        };
        let pos = pos
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("invalid position {:?}: {}", pos, e))
            .and_then(|pos| {
                Position::try_from(pos)
                    .map_err(|e| anyhow::anyhow!("error converting position: {}", e))
            })?;

        indexer
            .add_record(chrom, pos, pos, chunk)
            .map_err(|e| anyhow::anyhow!("error adding record to tabix index: {}", e))?;

        start_position = end_position;
    }

    let index = indexer.build();

    let mut writer = File::create(path_dst.as_ref())
        .map(tabix::Writer::new)
        .map_err(|e| anyhow::anyhow!("error creating output file for tbi creation: {}", e))?;
    writer
        .write_index(&index)
        .map_err(|e| anyhow::anyhow!("error writing tabix index: {}", e))?;

    Ok(())
}


use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::embeddings::{Chunk, ModelId};
use crate::index::{ScoredChunk, VectorIndex, rank_rows};
use crate::{LensError, Result};

/// `vectors.bin` layout: magic, format version, model id, dimension, row
/// count, then row-major little-endian `f32` data. The chunk records live
/// beside it in `chunks.jsonl`, positionally aligned.
const MAGIC: &[u8; 4] = b"LLVX";
const FORMAT_VERSION: u32 = 1;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.jsonl";

/// Read-only random access to a fixed-size vector array on durable
/// storage. Satisfied by a fully loaded index or by an on-demand file
/// reader; similarity search only needs this surface, so a large index
/// never has to be resident in memory to be searched.
pub trait VectorSource {
    fn model_id(&self) -> &ModelId;
    fn rows(&self) -> usize;
    fn read_row(&mut self, row: usize) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize {
        self.model_id().dimension()
    }
}

impl VectorSource for VectorIndex {
    #[inline]
    fn model_id(&self) -> &ModelId {
        VectorIndex::model_id(self)
    }

    #[inline]
    fn rows(&self) -> usize {
        self.len()
    }

    #[inline]
    fn read_row(&mut self, row: usize) -> Result<Vec<f32>> {
        Ok(self.row(row).to_vec())
    }
}

/// On-demand reader over `vectors.bin`: one seek and one row-sized read
/// per access, nothing else held in memory.
#[derive(Debug)]
pub struct FileVectorSource {
    file: File,
    model_id: ModelId,
    rows: usize,
    data_offset: u64,
}

impl FileVectorSource {
    #[inline]
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt(path, "bad magic"));
        }

        let version = read_u32(&mut file)?;
        if version != FORMAT_VERSION {
            return Err(corrupt(path, &format!("unsupported format version {version}")));
        }

        let model_len = read_u32(&mut file)? as usize;
        if model_len > 4096 {
            return Err(corrupt(path, "model id length out of range"));
        }
        let mut model_bytes = vec![0u8; model_len];
        file.read_exact(&mut model_bytes)?;
        let model_str = String::from_utf8(model_bytes)
            .map_err(|_| corrupt(path, "model id is not valid UTF-8"))?;
        let model_id: ModelId = model_str
            .parse()
            .map_err(|_| corrupt(path, "model id does not parse"))?;

        let dimension = read_u32(&mut file)? as usize;
        if dimension != model_id.dimension() {
            return Err(corrupt(
                path,
                &format!(
                    "stored dimension {dimension} disagrees with model id '{model_id}'"
                ),
            ));
        }

        let rows = read_u64(&mut file)? as usize;
        let data_offset = file.stream_position()?;

        let expected_len = data_offset + (rows * dimension * 4) as u64;
        let actual_len = file.metadata()?.len();
        if actual_len != expected_len {
            return Err(corrupt(
                path,
                &format!("expected {expected_len} bytes, found {actual_len}"),
            ));
        }

        Ok(Self {
            file,
            model_id,
            rows,
            data_offset,
        })
    }
}

impl VectorSource for FileVectorSource {
    #[inline]
    fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    #[inline]
    fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    fn read_row(&mut self, row: usize) -> Result<Vec<f32>> {
        let dimension = self.model_id.dimension();
        let offset = self.data_offset + (row * dimension * 4) as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; dimension * 4];
        self.file.read_exact(&mut buf)?;

        Ok(buf
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

/// Search any vector source, returning `(row, score)` pairs.
#[inline]
pub fn search_source(
    source: &mut dyn VectorSource,
    query: &[f32],
    k: usize,
) -> Result<Vec<(usize, f32)>> {
    let dimension = source.dimension();
    let rows = source.rows();
    rank_rows(query, dimension, k, rows, |i| source.read_row(i))
}

/// A committed index opened for reading: chunk records in memory, vectors
/// accessed on demand.
pub struct IndexReader {
    chunks: Vec<Chunk>,
    source: FileVectorSource,
}

impl IndexReader {
    #[inline]
    pub fn open(dir: &Path) -> Result<Self> {
        let source = FileVectorSource::open(&dir.join(VECTORS_FILE))?;
        let chunks = read_chunks(&dir.join(CHUNKS_FILE))?;

        if chunks.len() != source.rows() {
            return Err(LensError::Database(format!(
                "index at {} is misaligned: {} chunk records, {} vector rows",
                dir.display(),
                chunks.len(),
                source.rows()
            )));
        }

        Ok(Self { chunks, source })
    }

    #[inline]
    pub fn model_id(&self) -> &ModelId {
        self.source.model_id()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[inline]
    pub fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let ranked = search_source(&mut self.source, query, k)?;
        Ok(ranked
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}

/// Persist an index into `dir` (created if needed): `vectors.bin` plus the
/// positionally aligned `chunks.jsonl`.
#[inline]
pub fn write_index(dir: &Path, index: &VectorIndex) -> Result<()> {
    fs::create_dir_all(dir)?;

    let vectors_path = dir.join(VECTORS_FILE);
    let mut out = BufWriter::new(File::create(&vectors_path)?);

    let model_str = index.model_id().to_string();
    let dimension = index.model_id().dimension();

    out.write_all(MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&(model_str.len() as u32).to_le_bytes())?;
    out.write_all(model_str.as_bytes())?;
    out.write_all(&(dimension as u32).to_le_bytes())?;
    out.write_all(&(index.len() as u64).to_le_bytes())?;

    for i in 0..index.len() {
        for value in index.row(i) {
            out.write_all(&value.to_le_bytes())?;
        }
    }
    out.flush()?;

    let chunks_path = dir.join(CHUNKS_FILE);
    let mut out = BufWriter::new(File::create(&chunks_path)?);
    for chunk in index.chunks() {
        let line = serde_json::to_string(chunk)
            .map_err(|e| LensError::Database(format!("failed to serialize chunk record: {e}")))?;
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    debug!(
        dir = %dir.display(),
        rows = index.len(),
        model = %index.model_id(),
        "index written"
    );

    Ok(())
}

/// Load a committed index fully into memory (used by incremental builds).
#[inline]
pub fn read_index(dir: &Path) -> Result<VectorIndex> {
    let mut reader = IndexReader::open(dir)?;

    let mut entries = Vec::with_capacity(reader.len());
    for i in 0..reader.len() {
        let vector = reader.source.read_row(i)?;
        entries.push((reader.chunks[i].clone(), vector));
    }

    let model_id = reader.model_id().clone();
    VectorIndex::build(model_id, entries)
}

fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let file = BufReader::new(File::open(path)?);
    let mut chunks = Vec::new();

    for (line_no, line) in file.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
            LensError::Database(format!(
                "corrupt chunk record at {}:{}: {e}",
                path.display(),
                line_no + 1
            ))
        })?;
        chunks.push(chunk);
    }

    Ok(chunks)
}

fn read_u32(file: &mut File) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(file: &mut File) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn corrupt(path: &Path, detail: &str) -> LensError {
    LensError::Database(format!("corrupt index file {}: {detail}", path.display()))
}

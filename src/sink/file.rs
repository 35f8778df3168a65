//! IQ WAV file sink implementation.

use crate::format::offset_binary_i8;
use crate::sink::Sink;
use crate::{IqBlock, SampleFormat, SinkError};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

// WAV file format constants
// See: http://soundfile.sapp.org/doc/WaveFormat/

/// Byte offset of the file size field in WAV header (RIFF chunk size).
const WAV_FILE_SIZE_OFFSET: u64 = 4;

/// Byte offset of the sample rate field.
const WAV_SAMPLE_RATE_OFFSET: u64 = 24;

/// Byte offset of the data chunk size field in WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data.
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// I and Q are stored as the left and right channels.
const IQ_CHANNELS: u16 = 2;

/// A sink that records IQ to two-channel WAV files.
///
/// I goes to the left channel and Q to the right. Integer formats are
/// written as PCM at their native width, `F32` as IEEE float. Signed 8-bit
/// samples are converted to offset binary since 8-bit WAV is unsigned.
///
/// A WAV header describes a single format and rate, so the recording is
/// split into segments. The first segment is written to the given path.
/// When a block arrives in another format, or at another known sample
/// rate, the current segment is finalized and the next one opens as
/// `<stem>_1.<ext>`, `<stem>_2.<ext>` and so on. A rate that was unknown
/// when a segment opened is filled in once it becomes known.
///
/// Files are created on first write and their header sizes are patched
/// when the segment closes. All file I/O runs in the blocking thread pool.
///
/// # Example
///
/// ```no_run
/// use extio_stream::FileSink;
///
/// let sink = FileSink::wav("capture.wav");
/// // Use with IqCapture builder...
/// ```
pub struct FileSink {
    name: String,
    base: Arc<PathBuf>,
    state: Arc<Mutex<FileState>>,
}

/// The segment currently being written.
struct Segment {
    writer: BufWriter<File>,
    path: PathBuf,
    format: SampleFormat,
    sample_rate: u32,
    bytes_written: u64,
}

#[derive(Default)]
struct FileState {
    segment: Option<Segment>,
    finished: Vec<PathBuf>,
}

impl FileSink {
    /// Creates a new file sink that writes WAV format.
    pub fn wav(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            base: Arc::new(path.as_ref().to_path_buf()),
            state: Arc::new(Mutex::new(FileState::default())),
        }
    }

    /// Every segment opened so far, in recording order.
    pub async fn segments(&self) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        let mut paths = state.finished.clone();
        paths.extend(state.segment.as_ref().map(|s| s.path.clone()));
        paths
    }

    /// Flush buffered data to disk.
    ///
    /// This does NOT update the WAV header - that happens when the segment
    /// closes.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            if let Some(segment) = state.segment.as_mut() {
                segment
                    .writer
                    .flush()
                    .map_err(|e| SinkError::file_error(&segment.path, e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SinkError::custom(format!("flush task panicked: {e}")))?
    }

    /// Path of segment `index`: the base path first, then numbered siblings.
    fn segment_path(base: &Path, index: usize) -> PathBuf {
        if index == 0 {
            return base.to_path_buf();
        }
        let stem = base
            .file_stem()
            .map_or_else(|| "capture".into(), |s| s.to_string_lossy());
        let name = match base.extension() {
            Some(ext) => format!("{stem}_{index}.{}", ext.to_string_lossy()),
            None => format!("{stem}_{index}"),
        };
        base.with_file_name(name)
    }

    /// Writes a complete 44-byte WAV header.
    fn write_wav_header(
        writer: &mut BufWriter<File>,
        format: SampleFormat,
        sample_rate: u32,
        data_size: u32,
    ) -> std::io::Result<()> {
        writer.write_all(b"RIFF")?;
        let file_size = (WAV_HEADER_SIZE as u32 - 8).saturating_add(data_size);
        writer.write_all(&file_size.to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        writer.write_all(b"fmt ")?;
        writer.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        writer.write_all(&format.wav_format_tag().to_le_bytes())?;
        writer.write_all(&IQ_CHANNELS.to_le_bytes())?;
        Self::write_rate_fields(writer, format, sample_rate)?;
        writer.write_all(&(format.bytes_per_pair() as u16).to_le_bytes())?;
        writer.write_all(&format.bits_per_sample().to_le_bytes())?;

        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    /// Sample rate followed by byte rate.
    fn write_rate_fields(
        writer: &mut BufWriter<File>,
        format: SampleFormat,
        sample_rate: u32,
    ) -> std::io::Result<()> {
        writer.write_all(&sample_rate.to_le_bytes())?;
        let byte_rate = sample_rate.saturating_mul(format.bytes_per_pair() as u32);
        writer.write_all(&byte_rate.to_le_bytes())
    }

    /// Patches the size and rate fields of a finished segment.
    fn update_wav_header(segment: &mut Segment) -> std::io::Result<()> {
        let data_size = u32::try_from(segment.bytes_written).unwrap_or(u32::MAX);
        let file_size = (WAV_HEADER_SIZE as u32 - 8).saturating_add(data_size);
        let writer = &mut segment.writer;
        writer.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        writer.write_all(&file_size.to_le_bytes())?;

        writer.seek(SeekFrom::Start(WAV_SAMPLE_RATE_OFFSET))?;
        Self::write_rate_fields(writer, segment.format, segment.sample_rate)?;

        writer.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        writer.write_all(&data_size.to_le_bytes())?;

        writer.seek(SeekFrom::End(0))?;
        writer.flush()
    }

    fn open_segment(
        state: &FileState,
        base: &Path,
        format: SampleFormat,
        sample_rate: u32,
    ) -> Result<Segment, SinkError> {
        let path = Self::segment_path(base, state.finished.len());
        let file = File::create(&path).map_err(|e| SinkError::file_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        Self::write_wav_header(&mut writer, format, sample_rate, 0)
            .map_err(|e| SinkError::file_error(&path, e))?;
        tracing::debug!(path = %path.display(), %format, sample_rate, "WAV segment opened");

        Ok(Segment {
            writer,
            path,
            format,
            sample_rate,
            bytes_written: 0,
        })
    }

    fn write_block_blocking(
        state: &mut FileState,
        base: &Path,
        data: &[u8],
        format: SampleFormat,
        sample_rate: Option<f64>,
    ) -> Result<(), SinkError> {
        let rate = sample_rate.map_or(0, |r| r.round() as u32);

        let mut rollover = false;
        if let Some(segment) = state.segment.as_mut() {
            let rate_changed = rate != 0 && segment.sample_rate != 0 && rate != segment.sample_rate;
            if segment.format != format || rate_changed {
                tracing::info!(
                    path = %segment.path.display(),
                    previous_format = %segment.format,
                    format = %format,
                    previous_rate = segment.sample_rate,
                    rate,
                    "stream parameters changed, starting a new WAV segment"
                );
                rollover = true;
            } else if segment.sample_rate == 0 {
                segment.sample_rate = rate;
            }
        }
        if rollover {
            Self::finalize_blocking(state)?;
        }

        let segment = match state.segment.take() {
            Some(segment) => segment,
            None => Self::open_segment(state, base, format, rate)?,
        };
        let segment = state.segment.insert(segment);

        let result = if format == SampleFormat::I8 {
            segment.writer.write_all(&offset_binary_i8(data))
        } else {
            segment.writer.write_all(data)
        };
        result.map_err(|e| SinkError::file_error(&segment.path, e))?;
        segment.bytes_written += data.len() as u64;

        Ok(())
    }

    /// Closes the current segment, if any, patching its header.
    fn finalize_blocking(state: &mut FileState) -> Result<(), SinkError> {
        let Some(mut segment) = state.segment.take() else {
            return Ok(());
        };
        let result = Self::update_wav_header(&mut segment)
            .map_err(|e| SinkError::file_error(&segment.path, e));
        tracing::debug!(
            path = %segment.path.display(),
            bytes = segment.bytes_written,
            format = %segment.format,
            "WAV segment finalized"
        );
        state.finished.push(segment.path);
        result
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, block: &IqBlock) -> Result<(), SinkError> {
        tracing::trace!(
            sink = %self.name,
            sequence = block.sequence,
            bytes = block.data.len(),
            "writing block"
        );

        let data = Arc::clone(&block.data);
        let format = block.format;
        let sample_rate = block.sample_rate;
        let state = Arc::clone(&self.state);
        let base = Arc::clone(&self.base);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::write_block_blocking(&mut state, &base, &data, format, sample_rate)
        })
        .await
        .map_err(|e| SinkError::custom(format!("write task panicked: {e}")))?
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finalize_blocking(&mut state)
        })
        .await
        .map_err(|e| SinkError::custom(format!("finalize task panicked: {e}")))?
    }
}

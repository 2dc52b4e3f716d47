use crate::error::{CallError, Result};
use crate::media::{EncodedUnit, MediaFactory, MediaReader, MediaWriter};
use crate::peer::state::{MediaCodec, MediaKind};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

/// Audio is read from a fixed Ogg/Opus file and received audio is written to
/// `<output_dir>/<remote>.opus`.
pub struct FileMedia {
    audio_source: PathBuf,
    output_dir: PathBuf,
}

impl FileMedia {
    pub fn new(audio_source: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            audio_source: audio_source.into(),
            output_dir: output_dir.into(),
        }
    }
}

impl MediaFactory for FileMedia {
    fn open_source(&self, codec: &MediaCodec) -> Result<Box<dyn MediaReader>> {
        match codec.kind {
            MediaKind::Audio => Ok(Box::new(OggFileSource::open(&self.audio_source)?)),
            MediaKind::Video => Err(CallError::MediaAttachFailure(
                "no video source available".into(),
            )),
        }
    }

    fn create_sink(&self, remote: &str, codec: &MediaCodec) -> Result<Box<dyn MediaWriter>> {
        if codec.kind != MediaKind::Audio {
            return Err(CallError::MediaAttachFailure(format!(
                "can't record {} media",
                codec.mime_type
            )));
        }
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            CallError::MediaAttachFailure(format!("{}: {}", self.output_dir.display(), e))
        })?;
        let path = self.output_dir.join(format!("{}.opus", remote));
        Ok(Box::new(OggFileSink::create(
            &path,
            codec.clock_rate,
            codec.channels,
        )?))
    }
}

/// Remembers whether the underlying reader ran dry, so a failed page parse can be
/// told apart from the end of the file.
struct EofAware<R> {
    inner: R,
    eof: Arc<AtomicBool>,
}

impl<R: Read> Read for EofAware<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

/// Ogg pages as encoded units; the granule position is the time position.
pub struct OggFileSource {
    reader: OggReader<EofAware<BufReader<File>>>,
    eof: Arc<AtomicBool>,
}

impl OggFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| CallError::MediaAttachFailure(format!("{}: {}", path.display(), e)))?;
        let eof = Arc::new(AtomicBool::new(false));
        let source = EofAware {
            inner: BufReader::new(file),
            eof: eof.clone(),
        };
        let (reader, header) = OggReader::new(source, true)
            .map_err(|e| CallError::MediaAttachFailure(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            channels = header.channels,
            sample_rate = header.sample_rate,
            "opened audio source"
        );
        Ok(Self { reader, eof })
    }
}

impl MediaReader for OggFileSource {
    fn read_next(&mut self) -> Result<Option<EncodedUnit>> {
        match self.reader.parse_next_page() {
            Ok((data, header)) => Ok(Some(EncodedUnit {
                data: data.freeze(),
                time_position: header.granule_position,
            })),
            Err(_) if self.eof.load(Ordering::Relaxed) => Ok(None),
            Err(e) => Err(CallError::StreamFault(e.to_string())),
        }
    }
}

/// Writes received Opus RTP packets into an Ogg container.
pub struct OggFileSink {
    writer: OggWriter<File>,
    path: PathBuf,
}

impl OggFileSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| CallError::MediaAttachFailure(format!("{}: {}", path.display(), e)))?;
        let writer = OggWriter::new(file, sample_rate, channels as u8)
            .map_err(|e| CallError::MediaAttachFailure(e.to_string()))?;
        Ok(Self {
            writer,
            path: path.to_owned(),
        })
    }
}

impl MediaWriter for OggFileSink {
    fn write_unit(&mut self, unit: &EncodedUnit) -> Result<()> {
        let mut buf = unit.data.clone();
        let packet =
            Packet::unmarshal(&mut buf).map_err(|e| CallError::StreamFault(e.to_string()))?;
        self.writer
            .write_rtp(&packet)
            .map_err(|e| CallError::StreamFault(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        self.writer
            .close()
            .map_err(|e| CallError::StreamFault(e.to_string()))?;
        info!(path = %self.path.display(), "recording saved");
        Ok(())
    }
}

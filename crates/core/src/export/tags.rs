//! ID3 tagging for exported files.
//!
//! The tag is serialised once as ID3v2.4. MP3 streams carry it as a leading
//! block; RIFF/WAVE files keep it in an `id3 ` chunk after the audio data.

use chrono::Datelike;
use id3::{
    frame::{Comment, Picture, PictureType},
    Tag, TagLike, Timestamp, Version,
};

use crate::{Result, StudioError};

use super::Metadata;

const RIFF_HEADER_LEN: usize = 12;
const ID3_CHUNK_ID: &[u8; 4] = b"id3 ";

/// Builds the ID3 tag bytes for `metadata`.
pub fn build_id3_tag(metadata: &Metadata) -> Result<Vec<u8>> {
    let mut tag = Tag::new();
    tag.set_title(metadata.title.trim());
    tag.set_artist(metadata.speaker.trim());
    if let Some(series) = metadata.series.as_deref().filter(|s| !s.trim().is_empty()) {
        tag.set_album(series.trim());
    }
    if let Some(date) = metadata.date {
        tag.set_date_recorded(Timestamp {
            year: date.year(),
            month: Some(date.month() as u8),
            day: Some(date.day() as u8),
            hour: None,
            minute: None,
            second: None,
        });
    }
    if let Some(description) = metadata.description.as_deref().filter(|s| !s.trim().is_empty()) {
        tag.add_frame(Comment {
            lang: "eng".to_string(),
            description: String::new(),
            text: description.to_string(),
        });
    }
    if let Some(cover) = &metadata.cover_image {
        let mime_type = sniff_image_mime(cover).ok_or_else(|| {
            StudioError::MetadataEmbed("cover image is neither PNG nor JPEG".to_string())
        })?;
        tag.add_frame(Picture {
            mime_type: mime_type.to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: cover.clone(),
        });
    }

    let mut out = Vec::new();
    tag.write_to(&mut out, Version::Id3v24)
        .map_err(|e| StudioError::MetadataEmbed(e.to_string()))?;
    Ok(out)
}

/// Appends `tag` to a RIFF/WAVE file as an `id3 ` chunk and patches the RIFF
/// size field.
pub fn append_id3_chunk(wav: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    if wav.len() < RIFF_HEADER_LEN || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return Err(StudioError::MetadataEmbed("output is not a RIFF/WAVE file".to_string()));
    }
    let chunk_len = u32::try_from(tag.len())
        .map_err(|_| StudioError::MetadataEmbed("tag is too large".to_string()))?;

    let padded = tag.len() + tag.len() % 2;
    let mut out = Vec::with_capacity(wav.len() + 8 + padded);
    out.extend_from_slice(wav);
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out.extend_from_slice(ID3_CHUNK_ID);
    out.extend_from_slice(&chunk_len.to_le_bytes());
    out.extend_from_slice(tag);
    if tag.len() % 2 == 1 {
        out.push(0);
    }

    let riff_len = u32::try_from(out.len() - 8)
        .map_err(|_| StudioError::MetadataEmbed("tagged file exceeds 4 GiB".to_string()))?;
    out[4..8].copy_from_slice(&riff_len.to_le_bytes());
    Ok(out)
}

/// Puts `tag` in front of an MPEG audio stream.
pub fn prepend_id3_tag(mp3: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    if !tag.starts_with(b"ID3") {
        return Err(StudioError::MetadataEmbed("tag is not ID3v2".to_string()));
    }
    if mp3.starts_with(b"ID3") {
        return Err(StudioError::MetadataEmbed("stream is already tagged".to_string()));
    }
    let mut out = Vec::with_capacity(tag.len() + mp3.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(mp3);
    Ok(out)
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        export::encode::{encode_wav, AudioEncoder, Mp3Encoder},
        PcmBuffer,
    };

    fn metadata() -> Metadata {
        Metadata {
            title: "Grace Abounding".to_string(),
            speaker: "Pastor Ruth".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 10),
            series: Some("Lent".to_string()),
            description: Some("Morning service".to_string()),
            cover_image: None,
        }
    }

    #[test]
    fn tag_carries_the_metadata() {
        let bytes = build_id3_tag(&metadata()).unwrap();
        let tag = Tag::read_from2(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(tag.title(), Some("Grace Abounding"));
        assert_eq!(tag.artist(), Some("Pastor Ruth"));
        assert_eq!(tag.album(), Some("Lent"));
        assert_eq!(tag.date_recorded().map(|d| d.year), Some(2024));
    }

    #[test]
    fn appended_chunk_keeps_the_wav_readable() {
        let wav = encode_wav(&PcmBuffer::silent(8_000, 1, 801)).unwrap();
        let tag = build_id3_tag(&metadata()).unwrap();
        let tagged = append_id3_chunk(&wav, &tag).unwrap();

        let riff_len = u32::from_le_bytes([tagged[4], tagged[5], tagged[6], tagged[7]]) as usize;
        assert_eq!(riff_len, tagged.len() - 8);
        assert_eq!(tagged.len() % 2, 0);

        let reader = hound::WavReader::new(std::io::Cursor::new(tagged)).unwrap();
        assert_eq!(reader.duration(), 801);
    }

    #[test]
    fn unknown_cover_format_is_an_embed_error() {
        let mut metadata = metadata();
        metadata.cover_image = Some(vec![1, 2, 3, 4]);
        assert!(matches!(
            build_id3_tag(&metadata),
            Err(StudioError::MetadataEmbed(_))
        ));
    }

    #[test]
    fn rejects_non_wav_input() {
        assert!(append_id3_chunk(b"not a wav file", b"tag").is_err());
    }

    #[test]
    fn prepended_tag_leaves_the_mp3_playable() {
        let encoder = Mp3Encoder::default();
        let mp3 = encoder
            .encode(&PcmBuffer::silent(8_000, 1, 8_000), &mut |_| {})
            .unwrap();
        let tag = build_id3_tag(&metadata()).unwrap();
        let tagged = encoder.embed_tag(&mp3, &tag).unwrap();

        assert_eq!(&tagged[tag.len()..], mp3.as_slice());
        let read = Tag::read_from2(std::io::Cursor::new(&tagged)).unwrap();
        assert_eq!(read.title(), Some("Grace Abounding"));
        let decoded = crate::decode::decode_bytes("tagged.mp3", &tagged).unwrap();
        assert!(decoded.buffer.duration_seconds() >= 0.95);
        assert!(prepend_id3_tag(&tagged, &tag).is_err());
    }
}

use reqwest::{multipart::Part, Body};
use tokio_util::io::ReaderStream;
use tracing::debug;

use tgb_core::{
    errors::Error,
    ports::{base_name, InputFile},
    Result,
};

/// A file argument after resolution: either an upload or a plain field.
pub(crate) enum Resolved {
    Field(String),
    Upload(Part),
}

pub(crate) async fn resolve(field: &str, file: InputFile, filepath: bool) -> Result<Resolved> {
    match file {
        InputFile::Reader {
            reader,
            file_name,
            content_type,
        } => {
            let file_name = file_name.unwrap_or_else(|| field.to_string());
            let mime = content_type.or_else(|| guess_from_name(&file_name));
            let part = Part::stream(Body::wrap_stream(ReaderStream::new(reader)))
                .file_name(file_name);
            Ok(Resolved::Upload(with_mime(part, mime.as_deref())?))
        }
        InputFile::Bytes { data, file_name } => {
            let (mime, ext) = sniff(&data);
            let file_name = file_name.unwrap_or_else(|| match ext {
                Some(ext) => format!("{field}.{ext}"),
                None => field.to_string(),
            });
            let part = Part::bytes(data).file_name(file_name);
            Ok(Resolved::Upload(with_mime(part, Some(mime))?))
        }
        InputFile::Text(s) => {
            if filepath {
                if let Some(part) = open_local(&s).await? {
                    return Ok(Resolved::Upload(part));
                }
            }
            Ok(Resolved::Field(s))
        }
    }
}

/// Open `s` as an upload if it names an existing regular file.
async fn open_local(s: &str) -> Result<Option<Part>> {
    let path = std::path::Path::new(s);
    let len = match tokio::fs::metadata(path).await {
        Ok(md) if md.is_file() => md.len(),
        _ => return Ok(None),
    };

    debug!(path = %path.display(), len, "uploading local file");
    let file = tokio::fs::File::open(path).await?;
    let file_name = base_name(path).unwrap_or_else(|| "file".to_string());
    let mime = guess_from_name(&file_name);
    let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
        .file_name(file_name);
    Ok(Some(with_mime(part, mime.as_deref())?))
}

fn with_mime(part: Part, mime: Option<&str>) -> Result<Part> {
    match mime {
        Some(m) => part
            .mime_str(m)
            .map_err(|e| Error::Config(format!("invalid content type {m}: {e}"))),
        None => Ok(part),
    }
}

fn guess_from_name(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .first_raw()
        .map(|m| m.to_string())
}

/// Content type and extension from magic bytes.
pub(crate) fn sniff(data: &[u8]) -> (&'static str, Option<&'static str>) {
    match infer::get(data) {
        Some(t) => (t.mime_type(), Some(t.extension())),
        None => ("application/octet-stream", None),
    }
}

//! Parsers for the JSON the `b2` tool prints.

use b2_mirror_models::{RemoteAction, RemoteObject, UnfinishedUpload};
use serde::Deserialize;

/// One element of `b2 ls --json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntry {
    file_name: String,
    #[serde(default)]
    content_length: u64,
    action: RemoteAction,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    upload_timestamp: Option<i64>,
}

impl From<ListEntry> for RemoteObject {
    fn from(entry: ListEntry) -> Self {
        Self {
            key: entry.file_name,
            size: entry.content_length,
            action: entry.action,
            file_id: entry.file_id,
            upload_timestamp: entry.upload_timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    download_url: String,
}

/// Parses the JSON array printed by `b2 ls --json`.
///
/// An empty bucket may print nothing at all, which yields an empty list.
///
/// # Errors
///
/// Returns the JSON error for anything that is not a listing array.
pub fn parse_listing(stdout: &str) -> Result<Vec<RemoteObject>, serde_json::Error> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<ListEntry> = serde_json::from_str(stdout)?;
    Ok(entries.into_iter().map(RemoteObject::from).collect())
}

/// Picks the unfinished multi-part uploads out of a versions listing.
///
/// Entries without a file id cannot be cancelled and are skipped.
#[must_use]
pub fn unfinished_uploads(objects: Vec<RemoteObject>) -> Vec<UnfinishedUpload> {
    objects
        .into_iter()
        .filter(|o| o.action == RemoteAction::Start)
        .filter_map(|o| {
            let Some(file_id) = o.file_id else {
                log::warn!("Unfinished upload of {} has no file id, skipping", o.key);
                return None;
            };
            Some(UnfinishedUpload {
                file_id,
                file_name: o.key,
                upload_timestamp: o.upload_timestamp.unwrap_or(0),
            })
        })
        .collect()
}

/// Extracts `downloadUrl` from `b2 account get`, without a trailing slash.
///
/// # Errors
///
/// Returns the JSON error if the field is missing.
pub fn parse_download_url(stdout: &str) -> Result<String, serde_json::Error> {
    let info: AccountInfo = serde_json::from_str(stdout)?;
    Ok(info.download_url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
      {
        "accountId": "abc",
        "action": "upload",
        "bucketId": "b1",
        "contentLength": 2048,
        "contentSha1": "deadbeef",
        "contentType": "image/jpeg",
        "fileId": "4_z1",
        "fileInfo": {},
        "fileName": "folder1/a.jpg",
        "uploadTimestamp": 1700000000000
      },
      {
        "action": "folder",
        "contentLength": 0,
        "fileId": null,
        "fileName": "folder1/",
        "uploadTimestamp": 0
      },
      {
        "action": "start",
        "contentLength": 0,
        "fileId": "4_z2",
        "fileName": "big/video.mov",
        "uploadTimestamp": 1690000000000
      }
    ]"#;

    #[test]
    fn parses_listing_entries() {
        let objects = parse_listing(LISTING).unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].key, "folder1/a.jpg");
        assert_eq!(objects[0].size, 2048);
        assert_eq!(objects[0].action, RemoteAction::Upload);
        assert_eq!(objects[0].file_id.as_deref(), Some("4_z1"));
        assert_eq!(objects[1].action, RemoteAction::Folder);
        assert_eq!(objects[1].file_id, None);
    }

    #[test]
    fn empty_output_is_an_empty_listing() {
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("  \n").unwrap().is_empty());
        assert!(parse_listing("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(parse_listing("folder1/a.jpg\nfolder1/b.jpg\n").is_err());
    }

    #[test]
    fn extracts_unfinished_uploads() {
        let uploads = unfinished_uploads(parse_listing(LISTING).unwrap());
        assert_eq!(
            uploads,
            vec![UnfinishedUpload {
                file_id: "4_z2".to_string(),
                file_name: "big/video.mov".to_string(),
                upload_timestamp: 1_690_000_000_000,
            }]
        );
    }

    #[test]
    fn parses_download_url() {
        let url = parse_download_url(
            r#"{"accountId": "abc", "downloadUrl": "https://f005.backblazeb2.com/", "s3endpoint": "x"}"#,
        )
        .unwrap();
        assert_eq!(url, "https://f005.backblazeb2.com");
    }
}

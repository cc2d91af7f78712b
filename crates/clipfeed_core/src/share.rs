//! crates/clipfeed_core/src/share.rs
//!
//! Share records and the `app://share` deep link that points at them.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::domain::Share;
use crate::ports::{PortError, PortResult, ShareStore};

const LINK_SCHEME: &str = "app";
const LINK_HOST: &str = "share";

/// An inbound or outbound share link: `app://share?shareId=<id>&videoId=<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub share_id: Uuid,
    pub video_id: String,
}

impl ShareLink {
    pub fn for_share(share: &Share) -> Self {
        Self {
            share_id: share.id,
            video_id: share.video_id.clone(),
        }
    }

    pub fn to_url(&self) -> PortResult<Url> {
        let mut url = Url::parse(&format!("{}://{}", LINK_SCHEME, LINK_HOST))
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("shareId", &self.share_id.to_string())
            .append_pair("videoId", &self.video_id);
        Ok(url)
    }

    pub fn parse(link: &str) -> PortResult<Self> {
        let url = Url::parse(link)
            .map_err(|e| PortError::InvalidInput(format!("not a share link: {}", e)))?;
        if url.scheme() != LINK_SCHEME || url.host_str() != Some(LINK_HOST) {
            return Err(PortError::InvalidInput(format!("not a share link: {}", link)));
        }

        let mut share_id = None;
        let mut video_id = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "shareId" => share_id = Some(value.into_owned()),
                "videoId" => video_id = Some(value.into_owned()),
                _ => {}
            }
        }

        let share_id = share_id
            .ok_or_else(|| PortError::InvalidInput("share link has no shareId".to_string()))?;
        let share_id = Uuid::parse_str(&share_id)
            .map_err(|_| PortError::InvalidInput(format!("invalid shareId '{}'", share_id)))?;
        let video_id = video_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PortError::InvalidInput("share link has no videoId".to_string()))?;

        Ok(Self { share_id, video_id })
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_url() {
            Ok(url) => write!(f, "{}", url),
            Err(_) => Err(fmt::Error),
        }
    }
}

pub struct ShareService {
    store: Arc<dyn ShareStore>,
}

impl ShareService {
    pub fn new(store: Arc<dyn ShareStore>) -> Self {
        Self { store }
    }

    /// Records that `shared_by` shared `video_id` and returns the record and its link.
    pub async fn create_share(
        &self,
        video_id: &str,
        shared_by: Uuid,
        user_name: &str,
    ) -> PortResult<(Share, ShareLink)> {
        if video_id.trim().is_empty() {
            return Err(PortError::InvalidInput("video id must not be empty".to_string()));
        }
        let share = Share {
            id: Uuid::new_v4(),
            video_id: video_id.to_string(),
            shared_by,
            user_name: user_name.to_string(),
            shared_at: Utc::now(),
        };
        self.store.create_share(&share).await?;
        info!(share_id = %share.id, video_id, %shared_by, "Created share");
        let link = ShareLink::for_share(&share);
        Ok((share, link))
    }

    pub async fn resolve(&self, share_id: Uuid) -> PortResult<Share> {
        self.store.get_share(share_id).await
    }
}

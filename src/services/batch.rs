//! Cooperative batch draining of an image folder.
//!
//! Each worker process is handed a 0-based task index and a task count and
//! computes its own contiguous shard of the sorted image listing with plain
//! arithmetic; there is no coordination channel between workers. That only
//! holds together if every worker derives the same total ordering, so
//! `discover` sorts the listing by name and drops directory placeholders.
//!
//! Known limitation: nothing detects a listing that changes between two
//! workers' `discover` calls. Under concurrent mutation workers can disagree
//! on the total and skip or double-process items. Batch mode also keeps no
//! per-item failure memory; the next run re-attempts its whole shard.

use bytes::Bytes;
use chrono::Utc;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::models::record::{DestinationLayout, basename, timestamp_folder};
use crate::services::gateway::{ObjectEntry, ObjectStore, StoreError, StoreResult};
use crate::services::thumbnail::{ThumbnailError, ThumbnailSpec, render_thumbnail};

const IMAGE_EXTS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

/// The half-open index range `[start, end)` this worker owns.
///
/// `chunk = ceil(total / task_count)`, `start = chunk * task_index`,
/// `end = min(start + chunk, total)`. Indices past the end of the listing
/// produce an empty range, which is a successful no-op run.
pub fn shard_bounds(total: usize, task_index: usize, task_count: usize) -> Range<usize> {
    let chunk = total.div_ceil(task_count);
    let start = chunk * task_index;
    let end = (start + chunk).min(total);
    start..end.max(start)
}

/// Content type wins when present; otherwise fall back to a fixed set of
/// image file extensions.
pub fn looks_like_image(name: &str, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.starts_with("image/")) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTS.contains(&ext.as_str()))
}

/// Final state of one batch run. Per-item errors are counted, never fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub assigned: Range<usize>,
    pub processed: usize,
    pub errored: usize,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error("download failed: {0}")]
    Download(StoreError),
    #[error(transparent)]
    Thumbnail(ThumbnailError),
    #[error("render task failed: {0}")]
    Join(JoinError),
    #[error("upload failed: {0}")]
    Upload(StoreError),
}

pub struct BatchRunner {
    store: Arc<dyn ObjectStore>,
    spec: ThumbnailSpec,
    layout: DestinationLayout,
    task_index: usize,
    task_count: usize,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        spec: ThumbnailSpec,
        layout: DestinationLayout,
        task_index: usize,
        task_count: usize,
    ) -> Self {
        Self {
            store,
            spec,
            layout,
            task_index,
            task_count,
        }
    }

    /// List candidates under the prefix, drop directory placeholders, and
    /// sort by name so every worker computes the same ordering.
    pub async fn discover(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let mut entries: Vec<ObjectEntry> = self
            .store
            .list(bucket, prefix)
            .await?
            .into_iter()
            .filter(|entry| !entry.name.ends_with('/'))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Drain this worker's shard of `bucket/prefix` to completion.
    ///
    /// Only the initial listing can fail the run; once items are assigned,
    /// each is attempted independently and failures are logged and counted.
    pub async fn run(&self, bucket: &str, prefix: &str) -> StoreResult<BatchSummary> {
        info!(
            task = self.task_index,
            task_count = self.task_count,
            bucket,
            prefix,
            "batch run starting"
        );

        let images: Vec<ObjectEntry> = self
            .discover(bucket, prefix)
            .await?
            .into_iter()
            .filter(|entry| looks_like_image(&entry.name, entry.content_type.as_deref()))
            .collect();

        let total = images.len();
        let assigned = shard_bounds(total, self.task_index, self.task_count);
        if assigned.is_empty() {
            info!(task = self.task_index, total, "no indices assigned, nothing to do");
            return Ok(BatchSummary {
                total,
                assigned,
                processed: 0,
                errored: 0,
            });
        }

        info!(
            task = self.task_index,
            total,
            start = assigned.start,
            end = assigned.end,
            "assigned {} image(s)",
            assigned.len()
        );

        // One folder per run, shared by every item this worker uploads.
        let run_folder = timestamp_folder(Utc::now());
        let mut processed = 0usize;
        let mut errored = 0usize;

        for entry in &images[assigned.clone()] {
            match self.process_item(bucket, &entry.name, &run_folder).await {
                Ok(destination) => {
                    info!(task = self.task_index, object = %entry.name, destination, "processed");
                    processed += 1;
                }
                Err(err) => {
                    error!(
                        task = self.task_index,
                        object = format!("{bucket}/{}", entry.name),
                        error = %err,
                        "item failed"
                    );
                    errored += 1;
                }
            }
        }

        let summary = BatchSummary {
            total,
            assigned,
            processed,
            errored,
        };
        info!(
            task = self.task_index,
            processed = summary.processed,
            errored = summary.errored,
            start = summary.assigned.start,
            end = summary.assigned.end,
            total = summary.total,
            "batch run complete"
        );
        Ok(summary)
    }

    async fn process_item(
        &self,
        bucket: &str,
        object: &str,
        run_folder: &str,
    ) -> Result<String, ItemError> {
        let bytes = self
            .store
            .download(bucket, object)
            .await
            .map_err(ItemError::Download)?;

        let spec = self.spec.clone();
        let name = object.to_string();
        let thumb = tokio::task::spawn_blocking(move || render_thumbnail(&bytes, &name, &spec))
            .await
            .map_err(ItemError::Join)?
            .map_err(ItemError::Thumbnail)?;

        let dest_object = self.layout.object_name(run_folder, basename(object));
        let content_type = thumb.content_type();
        self.store
            .upload(bucket, &dest_object, Bytes::from(thumb.bytes), content_type)
            .await
            .map_err(ItemError::Upload)?;
        Ok(format!("{bucket}/{dest_object}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn shards_partition_ten_across_three_workers() {
        assert_eq!(shard_bounds(10, 0, 3), 0..4);
        assert_eq!(shard_bounds(10, 1, 3), 4..8);
        assert_eq!(shard_bounds(10, 2, 3), 8..10);
    }

    #[test]
    fn every_index_lands_in_exactly_one_shard() {
        for (total, task_count) in [(10, 3), (7, 2), (5, 5), (1, 4), (16, 7)] {
            let mut seen = vec![0u32; total];
            for task_index in 0..task_count {
                for i in shard_bounds(total, task_index, task_count) {
                    seen[i] += 1;
                }
            }
            assert!(seen.iter().all(|&n| n == 1), "total={total} count={task_count}");
        }
    }

    #[test]
    fn out_of_listing_indices_get_an_empty_shard() {
        assert!(shard_bounds(4, 4, 5).is_empty());
        assert!(shard_bounds(0, 0, 3).is_empty());
    }

    #[test]
    fn classification_prefers_content_type() {
        assert!(looks_like_image("weird.bin", Some("image/png")));
        assert!(looks_like_image("photo.JPG", None));
        assert!(looks_like_image("scan.tif", Some("application/octet-stream")));
        assert!(!looks_like_image("notes.txt", None));
        assert!(!looks_like_image("video.mp4", Some("video/mp4")));
    }

    fn png_fixture() -> Bytes {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 150, Rgba([7, 7, 7, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    /// Delegates to MemoryStore but refuses to download one named object.
    struct FlakyStore {
        inner: MemoryStore,
        fail_object: &'static str,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn download(&self, bucket: &str, object: &str) -> StoreResult<Bytes> {
            if object == self.fail_object {
                return Err(StoreError::Other("injected download failure".into()));
            }
            self.inner.download(bucket, object).await
        }

        async fn upload(
            &self,
            bucket: &str,
            object: &str,
            data: Bytes,
            content_type: &str,
        ) -> StoreResult<()> {
            self.inner.upload(bucket, object, data, content_type).await
        }

        async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
            self.inner.list(bucket, prefix).await
        }
    }

    #[tokio::test]
    async fn item_failure_does_not_abort_the_run() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_object: "in/bad.png",
        };
        store.inner.insert("photos", "in/bad.png", png_fixture(), Some("image/png"));
        store.inner.insert("photos", "in/good.png", png_fixture(), Some("image/png"));
        let store = Arc::new(store);

        let runner = BatchRunner::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            ThumbnailSpec::default(),
            DestinationLayout::Root,
            0,
            1,
        );
        let summary = runner.run("photos", "in/").await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errored, 1);

        // The successful item's thumbnail landed under the run folder.
        let uploaded: Vec<_> = store
            .inner
            .list("photos", "")
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.name.ends_with("/good.png") && !e.name.starts_with("in/"))
            .collect();
        assert_eq!(uploaded.len(), 1);
    }

    #[tokio::test]
    async fn placeholders_and_non_images_are_excluded() {
        let store = Arc::new(MemoryStore::new());
        store.insert("photos", "in/", Bytes::new(), None);
        store.insert("photos", "in/readme.txt", Bytes::new(), Some("text/plain"));
        store.insert("photos", "in/pic.png", png_fixture(), Some("image/png"));

        let runner = BatchRunner::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            ThumbnailSpec::default(),
            DestinationLayout::Root,
            0,
            1,
        );
        let summary = runner.run("photos", "in/").await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errored, 0);
    }

    #[tokio::test]
    async fn empty_shard_is_a_successful_no_op() {
        let store = Arc::new(MemoryStore::new());
        store.insert("photos", "in/pic.png", png_fixture(), Some("image/png"));

        let runner = BatchRunner::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            ThumbnailSpec::default(),
            DestinationLayout::Root,
            3,
            4,
        );
        let summary = runner.run("photos", "in/").await.unwrap();
        assert!(summary.assigned.is_empty());
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.errored, 0);
        // Nothing new was uploaded.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn resized_layout_places_items_under_resized_folder() {
        let store = Arc::new(MemoryStore::new());
        store.insert("photos", "in/pic.png", png_fixture(), Some("image/png"));

        let runner = BatchRunner::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            ThumbnailSpec::default(),
            DestinationLayout::Resized,
            0,
            1,
        );
        runner.run("photos", "in/").await.unwrap();

        let resized: Vec<_> = store
            .list("photos", "")
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.name.contains("/resized/pic.png"))
            .collect();
        assert_eq!(resized.len(), 1);
    }
}

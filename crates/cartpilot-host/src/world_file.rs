use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::Context;
use cartpilot_core::ProductId;
use cartpilot_dispatch::{CartSink, CatalogSink, SinkError};
use cartpilot_rules::{StockUpdate, World};
use cartpilot_scheduler::WorldSource;
use tracing::warn;

/// Storefront state kept in a JSON file (`{"catalog": {...}, "cart": {...}}`).
///
/// Read fresh on every snapshot so edits made by other processes are picked
/// up; an unreadable file falls back to the last snapshot that parsed.
pub struct FileWorld {
    path: PathBuf,
    last_good: Mutex<World>,
}

impl FileWorld {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let world = read_world(&path)?;
        Ok(Self {
            path,
            last_good: Mutex::new(world),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn update(&self, f: impl FnOnce(&mut World)) -> anyhow::Result<()> {
        let mut last = self.last_good.lock().expect("world poisoned");
        let mut world = match read_world(&self.path) {
            Ok(world) => world,
            Err(e) => {
                warn!(path = %self.path.display(), error = %format!("{e:#}"), "world file unreadable, rewriting from last snapshot");
                last.clone()
            }
        };
        f(&mut world);

        // Write-then-rename so a concurrent reader never sees a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&world)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        *last = world;
        Ok(())
    }
}

fn read_world(path: &Path) -> anyhow::Result<World> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

impl WorldSource for FileWorld {
    fn snapshot(&self) -> World {
        let mut last = self.last_good.lock().expect("world poisoned");
        match read_world(&self.path) {
            Ok(world) => {
                *last = world.clone();
                world
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "world file unreadable, reusing last snapshot");
                last.clone()
            }
        }
    }
}

impl CartSink for FileWorld {
    fn add_to_cart(&self, product_id: &ProductId, quantity: u32) -> Result<(), SinkError> {
        self.update(|w| {
            let qty = w.cart.entry(product_id.clone()).or_insert(0);
            *qty = qty.saturating_add(quantity);
        })
        .map_err(|e| SinkError(format!("{e:#}")))
    }
}

impl CatalogSink for FileWorld {
    fn apply_stock_updates(&self, updates: &[StockUpdate]) {
        if updates.is_empty() {
            return;
        }
        if let Err(e) = self.update(|w| w.apply_stock_updates(updates)) {
            // The order already went through; the next pass simply sees stale stock.
            warn!(error = %format!("{e:#}"), "failed to merge stock updates into world file");
        }
    }
}

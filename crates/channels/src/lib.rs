pub mod background;
pub mod channel;
pub mod http;
pub mod prober;

pub use background::{BackgroundService, Envelope};
pub use channel::{send_with_timeout, Channel, HttpChannel, LocalChannel};
pub use http::{router, serve_http};
pub use prober::{
    detect_with_backoff, redetect_schedule, CrmDetection, FieldInfo, LocateStrategy, NoPageProber,
    PageMetrics, PageProber, PageSnapshot, SnapshotProber,
};

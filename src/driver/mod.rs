pub mod cdp;
pub mod mock;
pub mod page;
pub mod scripts;
pub mod wireframe;

pub use cdp::{CdpPage, LaunchOptions};
pub use mock::{ControlEffect, MockControl, MockPage, MockSite, MockView, ScreenshotMode};
pub use page::{
    BrowserEvent, ConsoleLevel, EventSubscription, PageDriver, goto_within, publish, route_kind,
    url_path,
};
pub use scripts::{InputKind, PageScript, is_destructive_label, probe};
pub use wireframe::Wireframe;

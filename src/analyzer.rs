//! UI state analyzer.
//!
//! Classifies the rendered page from structural measurements instead of
//! element ids, then applies the assertion policy for the breakpoint class.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{Breakpoint, BreakpointClass};
use crate::driver::{PageDriver, PageScript, probe};
use crate::harness::types::HarnessResult;

/// Widest persistent sidebar tolerated on mobile
pub const MOBILE_SIDEBAR_CEILING_PX: u32 = 80;

/// Accessibility floor applied at every breakpoint
pub const MIN_FOCUSABLE_ELEMENTS: u32 = 3;

/// Sub-pixel rounding allowance before a page counts as overflowing
const OVERFLOW_TOLERANCE_PX: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SidebarMetrics {
    pub width: u32,
    pub visible: bool,
    /// Full-screen drawer rather than a persistent column
    pub overlay: bool,
}

/// Raw measurements taken from the page at one viewport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutMetrics {
    pub document_width: u32,
    pub document_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub sidebar: Option<SidebarMetrics>,
    pub has_heading: bool,
    pub heading_visible: bool,
    pub has_search_input: bool,
    pub search_visible: bool,
    pub table_visible: bool,
    pub table_rows: u32,
    pub card_count: u32,
    pub interactive_cards: u32,
    pub action_buttons: u32,
    /// Action controls inside the viewport, not merely in the tree
    pub visible_action_buttons: u32,
    pub menu_affordances: u32,
    pub focusable_count: u32,
    pub empty_state: bool,
}

impl LayoutMetrics {
    pub fn horizontal_overflow(&self) -> bool {
        self.document_width > self.viewport_width + OVERFLOW_TOLERANCE_PX
    }

    pub fn vertical_overflow(&self) -> bool {
        self.document_height > self.viewport_height + OVERFLOW_TOLERANCE_PX
    }

    pub fn has_data(&self) -> bool {
        self.table_rows > 0 || self.card_count > 0
    }

    pub fn layout_type(&self) -> LayoutType {
        if self.table_visible && self.table_rows > 0 {
            LayoutType::Table
        } else if self.card_count > 0 {
            LayoutType::Cards
        } else {
            LayoutType::Unknown
        }
    }

    fn only_empty_state(&self) -> bool {
        self.empty_state && !self.has_data()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutType {
    Table,
    Cards,
    Unknown,
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayoutType::Table => "table",
            LayoutType::Cards => "cards",
            LayoutType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiCheck {
    pub name: String,
    pub passed: bool,
    pub reason: String,
}

impl UiCheck {
    pub fn pass(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAssessment {
    pub breakpoint: Breakpoint,
    pub class: BreakpointClass,
    pub layout_type: LayoutType,
    pub metrics: LayoutMetrics,
    pub checks: Vec<UiCheck>,
}

impl UiAssessment {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&UiCheck> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Measure the current page and assess it for `breakpoint`
pub async fn inspect<P>(
    page: &P,
    breakpoint: &Breakpoint,
    custom: Vec<UiCheck>,
) -> HarnessResult<UiAssessment>
where
    P: PageDriver + ?Sized,
{
    let metrics: LayoutMetrics = probe(page, &PageScript::LayoutMetrics).await?;
    Ok(assess(&metrics, breakpoint, custom))
}

/// Apply the breakpoint policy to a set of measurements
pub fn assess(
    metrics: &LayoutMetrics,
    breakpoint: &Breakpoint,
    custom: Vec<UiCheck>,
) -> UiAssessment {
    let class = breakpoint.class();
    let layout_type = metrics.layout_type();
    let mut checks = vec![overflow_check(metrics), data_check(metrics)];

    match class {
        BreakpointClass::Mobile => {
            checks.push(mobile_sidebar_check(metrics));
            checks.push(mobile_layout_check(layout_type));
            checks.push(mobile_interaction_check(metrics));
        }
        BreakpointClass::Tablet | BreakpointClass::Desktop => {
            checks.push(tabular_layout_check(metrics, layout_type));
            checks.push(visible_actions_check(metrics));
        }
    }

    checks.push(focusable_check(metrics));
    checks.extend(custom);

    UiAssessment {
        breakpoint: breakpoint.clone(),
        class,
        layout_type,
        metrics: metrics.clone(),
        checks,
    }
}

fn overflow_check(m: &LayoutMetrics) -> UiCheck {
    if m.horizontal_overflow() {
        UiCheck::fail(
            "no-horizontal-overflow",
            format!(
                "document is {}px wide in a {}px viewport",
                m.document_width, m.viewport_width
            ),
        )
    } else {
        UiCheck::pass("no-horizontal-overflow", "content fits the viewport width")
    }
}

fn data_check(m: &LayoutMetrics) -> UiCheck {
    if m.has_data() {
        UiCheck::pass(
            "data-visible",
            format!("{} table rows, {} cards", m.table_rows, m.card_count),
        )
    } else if m.empty_state {
        UiCheck::pass("data-visible", "empty state indicator shown")
    } else {
        UiCheck::fail("data-visible", "no table rows or cards visible")
    }
}

fn mobile_sidebar_check(m: &LayoutMetrics) -> UiCheck {
    match &m.sidebar {
        None => UiCheck::pass("sidebar-collapsed", "no persistent sidebar"),
        Some(s) if !s.visible => UiCheck::pass("sidebar-collapsed", "sidebar collapsed"),
        Some(s) if s.overlay => UiCheck::pass("sidebar-collapsed", "sidebar rendered as overlay"),
        Some(s) if s.width <= MOBILE_SIDEBAR_CEILING_PX => {
            UiCheck::pass("sidebar-collapsed", format!("sidebar rail is {}px", s.width))
        }
        Some(s) => UiCheck::fail(
            "sidebar-collapsed",
            format!(
                "sidebar is {}px wide, ceiling is {}px on mobile",
                s.width, MOBILE_SIDEBAR_CEILING_PX
            ),
        ),
    }
}

fn mobile_layout_check(layout: LayoutType) -> UiCheck {
    match layout {
        LayoutType::Cards => UiCheck::pass("mobile-layout", "card layout"),
        LayoutType::Table => {
            UiCheck::pass("mobile-layout", "table layout on mobile (cards preferred)")
        }
        LayoutType::Unknown => UiCheck::pass("mobile-layout", "no repeated data layout detected"),
    }
}

// Cards and menus may carry the actions on mobile, so either counts.
fn mobile_interaction_check(m: &LayoutMetrics) -> UiCheck {
    if m.visible_action_buttons > 0 {
        UiCheck::pass(
            "mobile-interaction",
            format!("{} action buttons visible", m.visible_action_buttons),
        )
    } else if m.interactive_cards > 0 || m.menu_affordances > 0 {
        UiCheck::pass(
            "mobile-interaction",
            format!(
                "{} interactive cards, {} menu affordances",
                m.interactive_cards, m.menu_affordances
            ),
        )
    } else if m.only_empty_state() {
        UiCheck::pass("mobile-interaction", "empty state, nothing to act on")
    } else {
        UiCheck::fail("mobile-interaction", "no action buttons found")
    }
}

fn tabular_layout_check(m: &LayoutMetrics, layout: LayoutType) -> UiCheck {
    if layout == LayoutType::Table {
        UiCheck::pass("tabular-layout", format!("{} rows in table", m.table_rows))
    } else if m.only_empty_state() {
        UiCheck::pass("tabular-layout", "empty state, no table expected")
    } else {
        UiCheck::fail("tabular-layout", format!("expected table layout, found {}", layout))
    }
}

fn visible_actions_check(m: &LayoutMetrics) -> UiCheck {
    if m.visible_action_buttons > 0 {
        UiCheck::pass(
            "action-buttons-visible",
            format!("{} of {} action buttons visible", m.visible_action_buttons, m.action_buttons),
        )
    } else if m.only_empty_state() {
        UiCheck::pass("action-buttons-visible", "empty state, nothing to act on")
    } else {
        UiCheck::fail("action-buttons-visible", "no action buttons found")
    }
}

fn focusable_check(m: &LayoutMetrics) -> UiCheck {
    if m.focusable_count >= MIN_FOCUSABLE_ELEMENTS {
        UiCheck::pass("focusable-floor", format!("{} focusable elements", m.focusable_count))
    } else {
        UiCheck::fail(
            "focusable-floor",
            format!(
                "{} focusable elements, need at least {}",
                m.focusable_count, MIN_FOCUSABLE_ELEMENTS
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mobile() -> Breakpoint {
        Breakpoint::new(375, 667, "mobile", "")
    }

    fn desktop() -> Breakpoint {
        Breakpoint::new(1280, 800, "desktop", "")
    }

    fn desktop_table() -> LayoutMetrics {
        LayoutMetrics {
            document_width: 1280,
            document_height: 1400,
            viewport_width: 1280,
            viewport_height: 800,
            sidebar: Some(SidebarMetrics { width: 240, visible: true, overlay: false }),
            has_heading: true,
            heading_visible: true,
            table_visible: true,
            table_rows: 10,
            action_buttons: 20,
            visible_action_buttons: 12,
            focusable_count: 40,
            ..Default::default()
        }
    }

    fn mobile_cards() -> LayoutMetrics {
        LayoutMetrics {
            document_width: 375,
            viewport_width: 375,
            viewport_height: 667,
            card_count: 1,
            interactive_cards: 1,
            focusable_count: 5,
            ..Default::default()
        }
    }

    fn check<'a>(a: &'a UiAssessment, name: &str) -> &'a UiCheck {
        a.checks.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_desktop_table_passes() {
        let a = assess(&desktop_table(), &desktop(), vec![]);
        assert_eq!(a.layout_type, LayoutType::Table);
        assert!(a.passed(), "{}", a.failure_summary());
    }

    #[test]
    fn test_overflow_fails_at_any_width() {
        let mut m = desktop_table();
        m.document_width = 1500;
        let a = assess(&m, &desktop(), vec![]);
        assert!(!check(&a, "no-horizontal-overflow").passed);
    }

    #[test]
    fn test_mobile_card_interactivity_substitutes_for_buttons() {
        let a = assess(&mobile_cards(), &mobile(), vec![]);
        assert_eq!(a.class, BreakpointClass::Mobile);
        assert!(check(&a, "mobile-interaction").passed);
        assert!(a.checks.iter().all(|c| c.name != "action-buttons-visible"));
        assert!(a.passed(), "{}", a.failure_summary());
    }

    #[test]
    fn test_mobile_without_cards_or_buttons_fails() {
        let mut m = mobile_cards();
        m.card_count = 0;
        m.interactive_cards = 0;
        let a = assess(&m, &mobile(), vec![]);
        let c = check(&a, "mobile-interaction");
        assert!(!c.passed);
        assert_eq!(c.reason, "no action buttons found");
    }

    #[test]
    fn test_mobile_sidebar_ceiling() {
        let mut m = mobile_cards();
        m.sidebar = Some(SidebarMetrics { width: 240, visible: true, overlay: false });
        assert!(!check(&assess(&m, &mobile(), vec![]), "sidebar-collapsed").passed);
        m.sidebar = Some(SidebarMetrics { width: 64, visible: true, overlay: false });
        assert!(check(&assess(&m, &mobile(), vec![]), "sidebar-collapsed").passed);
        m.sidebar = Some(SidebarMetrics { width: 300, visible: true, overlay: true });
        assert!(check(&assess(&m, &mobile(), vec![]), "sidebar-collapsed").passed);
    }

    #[test]
    fn test_empty_state_satisfies_data_check() {
        let m = LayoutMetrics {
            document_width: 1280,
            viewport_width: 1280,
            empty_state: true,
            focusable_count: 4,
            ..Default::default()
        };
        let a = assess(&m, &desktop(), vec![]);
        assert!(a.passed(), "{}", a.failure_summary());
    }

    #[test]
    fn test_desktop_cards_fail_table_expectation() {
        let mut m = desktop_table();
        m.table_visible = false;
        m.table_rows = 0;
        m.card_count = 8;
        let a = assess(&m, &desktop(), vec![]);
        assert!(!check(&a, "tabular-layout").passed);
    }

    #[test]
    fn test_focusable_floor_and_custom_checks() {
        let mut m = desktop_table();
        m.focusable_count = 2;
        let a = assess(&m, &desktop(), vec![UiCheck::fail("custom", "scenario specific")]);
        assert!(!check(&a, "focusable-floor").passed);
        assert_eq!(a.failures().len(), 2);
    }
}

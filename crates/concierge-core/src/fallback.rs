//! Deterministic, rule-based partial answers for when no model response is
//! obtainable. Same query and context always produce the same text, so the
//! degraded paths stay testable.

/// One upcoming itinerary item the synthesizer may surface.
#[derive(Debug, Clone)]
pub struct ScheduleItem {
    pub title: String,
    pub when: String,
}

/// One unsettled balance the synthesizer may surface.
#[derive(Debug, Clone)]
pub struct ExpenseItem {
    pub description: String,
    pub amount: String,
}

/// Locally-available structured context for offline answers.
#[derive(Debug, Clone, Default)]
pub struct FallbackContext {
    pub base_location: Option<String>,
    pub upcoming: Vec<ScheduleItem>,
    pub unsettled: Vec<ExpenseItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Location,
    Schedule,
    Financial,
    Task,
}

const LOCATION_KEYWORDS: &[&str] = &[
    "where", "hotel", "address", "location", "directions", "map", "near", "nearby",
];
const SCHEDULE_KEYWORDS: &[&str] = &[
    "when", "schedule", "itinerary", "today", "tomorrow", "tonight", "agenda", "plan",
];
const FINANCIAL_KEYWORDS: &[&str] = &[
    "cost", "price", "owe", "paid", "pay", "split", "expense", "budget", "money",
];
const TASK_KEYWORDS: &[&str] = &["task", "todo", "poll", "remind", "checklist", "vote"];

/// Priority order is fixed: a query matching both location and schedule
/// keywords resolves as location.
fn classify(query: &str) -> Option<Intent> {
    let q = query.to_lowercase();
    let matches = |kws: &[&str]| kws.iter().any(|k| q.contains(k));
    if matches(LOCATION_KEYWORDS) {
        Some(Intent::Location)
    } else if matches(SCHEDULE_KEYWORDS) {
        Some(Intent::Schedule)
    } else if matches(FINANCIAL_KEYWORDS) {
        Some(Intent::Financial)
    } else if matches(TASK_KEYWORDS) {
        Some(Intent::Task)
    } else {
        None
    }
}

/// Produce a canned partial answer from whatever context is available.
/// Pure and side-effect free.
pub fn synthesize(query: &str, ctx: &FallbackContext) -> String {
    match classify(query) {
        Some(Intent::Location) => match &ctx.base_location {
            Some(base) => format!(
                "I can't reach the concierge right now, but this trip is based at {base}. \
                 The map tab has everything saved for this trip with directions."
            ),
            None => "I can't reach the concierge right now. The map tab has every place \
                     saved for this trip with directions."
                .to_string(),
        },
        Some(Intent::Schedule) => {
            if ctx.upcoming.is_empty() {
                "I can't reach the concierge right now, and nothing upcoming is on the \
                 itinerary. The schedule tab has the full plan."
                    .to_string()
            } else {
                let items: Vec<String> = ctx
                    .upcoming
                    .iter()
                    .take(3)
                    .map(|s| format!("{} ({})", s.title, s.when))
                    .collect();
                format!(
                    "I can't reach the concierge right now. Next on the itinerary: {}. \
                     The schedule tab has the full plan.",
                    items.join(", ")
                )
            }
        }
        Some(Intent::Financial) => {
            if ctx.unsettled.is_empty() {
                "I can't reach the concierge right now. No unsettled balances are \
                 recorded; the payments tab has the full breakdown."
                    .to_string()
            } else {
                let items: Vec<String> = ctx
                    .unsettled
                    .iter()
                    .take(3)
                    .map(|e| format!("{} ({})", e.description, e.amount))
                    .collect();
                format!(
                    "I can't reach the concierge right now. Outstanding: {}. \
                     The payments tab has the full breakdown.",
                    items.join(", ")
                )
            }
        }
        Some(Intent::Task) => "I can't reach the concierge right now, so I couldn't \
             check or change any tasks. The tasks tab has the current lists and polls."
            .to_string(),
        None => "The concierge is temporarily unavailable. You can still browse saved \
             places in the map tab, the plan in the schedule tab, balances in the \
             payments tab, and lists in the tasks tab."
            .to_string(),
    }
}

//! Character budget split between the tags, description and events sections.
//!
//! All lengths are counted in code points.

/// Space granted to each message section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionBudget {
    pub tags: usize,
    pub desc: usize,
    pub events: usize,
}

impl SectionBudget {
    pub fn total(&self) -> usize {
        self.tags + self.desc + self.events
    }
}

/// Split `budget` between sections of the given full lengths.
///
/// Sections that fit their fair share keep their full length and hand the
/// rest to the others. The events section is then topped up to
/// `events_min` (fences, one line and the tail) by taking from the
/// description first and the tags second, when the budget allows it.
pub fn split(budget: usize, full: SectionBudget, events_min: usize) -> SectionBudget {
    if full.total() <= budget {
        return full;
    }

    let sizes = [full.tags, full.desc, full.events];
    let mut granted = [0usize; 3];
    let mut open: Vec<usize> = vec![0, 1, 2];
    let mut left = budget;

    // Water filling: fix every section smaller than the current fair share.
    loop {
        let fair = left / open.len();
        let (small, large): (Vec<usize>, Vec<usize>) =
            open.iter().partition(|&&i| sizes[i] <= fair);
        if small.is_empty() {
            for &i in &large {
                granted[i] = fair;
            }
            // Rounding remainder goes to the last open section (events first).
            if let Some(&last) = large.last() {
                granted[last] += left - fair * large.len();
            }
            break;
        }
        for &i in &small {
            granted[i] = sizes[i];
            left -= sizes[i];
        }
        open = large;
        if open.is_empty() {
            break;
        }
    }

    let mut result = SectionBudget {
        tags: granted[0],
        desc: granted[1],
        events: granted[2],
    };

    let wanted = events_min.min(full.events);
    if result.events < wanted {
        let mut missing = wanted - result.events;
        let from_desc = missing.min(result.desc);
        result.desc -= from_desc;
        missing -= from_desc;
        let from_tags = missing.min(result.tags);
        result.tags -= from_tags;
        missing -= from_tags;
        result.events = wanted - missing;
    }

    result
}

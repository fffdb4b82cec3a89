//! Which detail sync to schedule after resolving a show/season/episode chain.
//!
//! The decision depends on which ancestors already existed, not only on
//! whether the leaf is new: a detail sync of a new ancestor already covers
//! everything below it.

/// Follow-up work for a resolved show, season or episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    Nothing,
    /// Sync the show, including its season list.
    Show,
    /// Sync the season's episodes.
    Season,
}

/// Decide the follow-up for a chain given the `created` flag of each level.
///
/// Levels the item does not reach (e.g. the episode of a show item) are
/// passed as `false`.
pub fn chain_follow_up(show_created: bool, season_created: bool, episode_created: bool) -> Cascade {
    match (show_created, season_created, episode_created) {
        (true, _, _) => Cascade::Show,
        (false, true, _) => Cascade::Show,
        (false, false, true) => Cascade::Season,
        (false, false, false) => Cascade::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_chain_combinations() {
        let cases = [
            ((false, false, false), Cascade::Nothing),
            ((false, false, true), Cascade::Season),
            ((false, true, false), Cascade::Show),
            ((false, true, true), Cascade::Show),
            ((true, false, false), Cascade::Show),
            ((true, false, true), Cascade::Show),
            ((true, true, false), Cascade::Show),
            ((true, true, true), Cascade::Show),
        ];
        for ((show, season, episode), expected) in cases {
            assert_eq!(
                chain_follow_up(show, season, episode),
                expected,
                "show={show} season={season} episode={episode}"
            );
        }
    }

    #[test]
    fn test_season_job_only_when_both_ancestors_existed() {
        for show in [false, true] {
            for season in [false, true] {
                for episode in [false, true] {
                    let is_season = chain_follow_up(show, season, episode) == Cascade::Season;
                    assert_eq!(is_season, episode && !season && !show);
                }
            }
        }
    }
}

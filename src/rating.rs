//! Pure Elo rating calculator. No I/O, no state — every other component
//! that needs a rating change calls straight into here.

/// Configuration for a single rating computation. `k_factor` is the only
/// knob exposed to operators (see `Config::rating`).
#[derive(Debug, Clone, Copy)]
pub struct RatingParams {
    pub k_factor: i32,
    pub min_rating: i32,
    pub max_rating: i32,
}

impl Default for RatingParams {
    fn default() -> Self {
        Self {
            k_factor: 32,
            min_rating: 0,
            max_rating: 10_000,
        }
    }
}

/// The outcome of a single match from player 1's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Player1Wins,
    Player2Wins,
    Tie,
}

impl Outcome {
    pub fn from_scores(score1: i32, score2: i32) -> Self {
        match score1.cmp(&score2) {
            std::cmp::Ordering::Greater => Outcome::Player1Wins,
            std::cmp::Ordering::Less => Outcome::Player2Wins,
            std::cmp::Ordering::Equal => Outcome::Tie,
        }
    }

    fn actual_score_p1(self) -> f64 {
        match self {
            Outcome::Player1Wins => 1.0,
            Outcome::Player2Wins => 0.0,
            Outcome::Tie => 0.5,
        }
    }
}

/// New ratings for both players after one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingChange {
    pub before: i32,
    pub after: i32,
}

impl RatingChange {
    pub fn delta(&self) -> i32 {
        self.after - self.before
    }
}

/// Computes the new ratings for both players given their ratings before the
/// match and the match outcome.
///
/// `E1 = 1 / (1 + 10^((R2-R1)/400))`, `A1` is 1/0/0.5 depending on outcome,
/// `R1' = clamp(round(R1 + K*(A1-E1)), min, max)`. Rounding is half-away-
/// from-zero (`f64::round`'s behaviour on nonnegative deltas; ties never
/// occur at exactly .5 away from a clamp boundary in practice, but the
/// clamp is applied after rounding regardless).
pub fn calc(
    rating1: i32,
    rating2: i32,
    score1: i32,
    score2: i32,
    params: RatingParams,
) -> (RatingChange, RatingChange) {
    debug_assert!(rating1 >= 0 && rating2 >= 0, "ratings must be non-negative");
    debug_assert!(params.k_factor > 0, "k-factor must be positive");

    let outcome = Outcome::from_scores(score1, score2);
    let expected1 = expected_score(rating1, rating2);
    let expected2 = 1.0 - expected1;
    let actual1 = outcome.actual_score_p1();
    let actual2 = 1.0 - actual1;

    let raw_delta1 = params.k_factor as f64 * (actual1 - expected1);
    let raw_delta2 = params.k_factor as f64 * (actual2 - expected2);

    let after1 = clamp(
        rating1 + round_half_away_from_zero(raw_delta1),
        params.min_rating,
        params.max_rating,
    );
    let after2 = clamp(
        rating2 + round_half_away_from_zero(raw_delta2),
        params.min_rating,
        params.max_rating,
    );

    (
        RatingChange {
            before: rating1,
            after: after1,
        },
        RatingChange {
            before: rating2,
            after: after2,
        },
    )
}

fn expected_score(rating_self: i32, rating_opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_opponent - rating_self) as f64 / 400.0))
}

fn round_half_away_from_zero(x: f64) -> i32 {
    if x >= 0.0 {
        (x + 0.5).floor() as i32
    } else {
        (x - 0.5).ceil() as i32
    }
}

fn clamp(value: i32, min: i32, max: i32) -> i32 {
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RatingParams {
        RatingParams::default()
    }

    #[test]
    fn equal_ratings_win_splits_32() {
        let (p1, p2) = calc(1500, 1500, 3, 1, params());
        assert_eq!(p1.after, 1516);
        assert_eq!(p2.after, 1484);
    }

    #[test]
    fn equal_ratings_tie_unchanged() {
        let (p1, p2) = calc(1500, 1500, 2, 2, params());
        assert_eq!(p1.after, 1500);
        assert_eq!(p2.after, 1500);
    }

    #[test]
    fn clamp_never_exceeds_bounds() {
        let (p1, p2) = calc(9990, 0, 10, 0, params());
        assert!(p1.after <= 10_000);
        assert!(p2.after >= 0);
    }

    #[test]
    fn clamp_at_floor() {
        let (_, p2) = calc(0, 30, 0, 30, params());
        assert!(p2.after >= 0);
    }

    #[test]
    fn symmetry_within_rounding_slack() {
        // Property 1: for a spread of rating pairs and outcomes, the sum of
        // deltas is within {-1, 0, 1}.
        let ratings = [0, 1, 500, 1200, 1500, 1501, 2000, 9999, 10_000];
        for &r1 in &ratings {
            for &r2 in &ratings {
                for (s1, s2) in [(1, 0), (0, 1), (1, 1), (3, 1), (1, 3)] {
                    let (c1, c2) = calc(r1, r2, s1, s2, params());
                    let sum = c1.delta() + c2.delta();
                    assert!(
                        (-1..=1).contains(&sum),
                        "r1={r1} r2={r2} s1={s1} s2={s2} sum={sum}"
                    );
                }
            }
        }
    }

    #[test]
    fn clamp_property_holds_for_all_pairs() {
        let ratings = [0, 1, 500, 1500, 9999, 10_000];
        for &r1 in &ratings {
            for &r2 in &ratings {
                let (c1, c2) = calc(r1, r2, 5, 2, params());
                assert!((0..=10_000).contains(&c1.after));
                assert!((0..=10_000).contains(&c2.after));
            }
        }
    }

    #[test]
    fn beating_higher_rated_opponent_is_nonnegative_and_usually_positive() {
        let (winner, _) = calc(1200, 1800, 3, 0, params());
        assert!(winner.delta() >= 0);
        assert!(winner.delta() > 0);
    }

    #[test]
    fn beating_lower_rated_opponent_still_nonnegative() {
        // Winning against a much weaker opponent: E1 close to 1, so delta
        // approaches 0 but must never go negative for the winner.
        let (winner, _) = calc(2400, 800, 3, 0, params());
        assert!(winner.delta() >= 0);
    }

    #[test]
    fn loser_never_gains() {
        let (_, loser) = calc(1500, 1500, 5, 1, params());
        assert!(loser.delta() <= 0);
    }
}

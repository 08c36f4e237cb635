use rand::Rng;
use serenity::model::id::UserId;
use thiserror::Error;

pub const DEFAULT_FACES: u32 = 6;

#[derive(Debug, Error, PartialEq)]
pub enum DiceError {
    #[error("A die needs a positive number of faces, got `{0}`")]
    InvalidFaces(String),
}

/// Parses the optional `!roll` argument into a die size.
pub fn faces(argument: Option<&str>) -> Result<u32, DiceError> {
    let Some(raw) = argument.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(DEFAULT_FACES);
    };

    match raw.parse::<u32>() {
        Ok(faces) if faces >= 1 => Ok(faces),
        _ => Err(DiceError::InvalidFaces(raw.to_string())),
    }
}

pub fn roll<R: Rng>(rng: &mut R, faces: u32) -> u32 {
    rng.gen_range(1..=faces)
}

pub fn flip<R: Rng>(rng: &mut R) -> &'static str {
    if rng.gen_bool(0.5) {
        "Heads"
    } else {
        "Tails"
    }
}

pub fn about(owner: Option<UserId>) -> String {
    match owner {
        Some(owner) => format!("I was made by <@{}>", owner.0),
        None => format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn faces_defaults_and_validates() {
        assert_eq!(faces(None).unwrap(), 6);
        assert_eq!(faces(Some(" ")).unwrap(), 6);
        assert_eq!(faces(Some("20")).unwrap(), 20);
        assert_eq!(faces(Some("1")).unwrap(), 1);
        assert_eq!(faces(Some("0")), Err(DiceError::InvalidFaces("0".to_string())));
        assert!(faces(Some("d20")).is_err());
        assert!(faces(Some("-3")).is_err());
    }

    #[test]
    fn rolls_stay_on_the_die() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let value = roll(&mut rng, 6);
            assert!((1..=6).contains(&value));
        }
    }

    #[test]
    fn one_faced_die_always_rolls_one() {
        let mut rng = StdRng::seed_from_u64(7);

        assert!((0..20).all(|_| roll(&mut rng, 1) == 1));
    }

    #[test]
    fn about_mentions_the_owner() {
        assert_eq!(about(Some(UserId(42))), "I was made by <@42>");
        assert!(about(None).starts_with("duba_nano v"));
    }

    #[test]
    fn both_coin_sides_show_up() {
        let mut rng = StdRng::seed_from_u64(7);
        let sides: Vec<&str> = (0..100).map(|_| flip(&mut rng)).collect();

        assert!(sides.contains(&"Heads"));
        assert!(sides.contains(&"Tails"));
    }
}

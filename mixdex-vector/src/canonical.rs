// ---------------------------------------------------------------------------
// Artist name canonicalization
// ---------------------------------------------------------------------------
//
// Maps free-text artist names onto the keys the artist catalog is indexed
// by: lower-case, accents stripped, leading articles and "Ms." dropped, "&"
// spelled out, apostrophes and periods removed, any other symbol turned into
// "_", whitespace trimmed.
//
// The rules are one alternation, so at each position only the first matching
// rule fires. A single pass can expose a new match (stripping "the " may leave
// "the " again at the start), so passes repeat until the text is stable.
// ---------------------------------------------------------------------------

use std::sync::LazyLock;

use regex::{Captures, Regex};
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

/// `(pattern, replacement)` in priority order.
const SUBSTITUTIONS: &[(&str, &str)] = &[
	(r"^\s*the\s+", ""),
	(r"^\s*an?\s+", ""),
	(r"\s*&\s*", " and "),
	(r"^\s+", ""),
	(r"\s+$", ""),
	(r"'|\.", ""),
	(r"[^A-z0-9 ]", "_"),
	(r"^\s*ms\.?\s+", ""),
];

static NORMALIZATION: LazyLock<Regex> = LazyLock::new(|| {
	let combined = SUBSTITUTIONS
		.iter()
		.map(|(pattern, _)| format!("({})", pattern))
		.collect::<Vec<_>>()
		.join("|");
	Regex::new(&combined).expect("artist substitution patterns are valid")
});

/// Decompose (NFKD) and drop combining marks: "Björk" → "Bjork".
pub fn remove_accents(input: &str) -> String {
	input
		.nfkd()
		.filter(|c| canonical_combining_class(*c) == 0)
		.collect()
}

fn substitute_once(text: &str) -> String {
	NORMALIZATION
		.replace_all(text, |caps: &Captures| {
			let rule = (1..caps.len()).find(|i| caps.get(*i).is_some());
			match rule {
				Some(i) => SUBSTITUTIONS[i - 1].1,
				None => "",
			}
		})
		.into_owned()
}

/// Canonical catalog key for an artist name.
///
/// Passes repeat until the text stops changing. The first pass rewrites every
/// character the rules touch, so each later pass either deletes text or is
/// the last one.
pub fn canonicalize(artist: &str) -> String {
	let mut current = substitute_once(&remove_accents(&artist.to_lowercase()));
	loop {
		let next = substitute_once(&current);
		if next == current {
			return current;
		}
		current = next;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_ms_prefix() {
		assert_eq!(canonicalize("Ms. Lauryn Hill"), "lauryn hill");
	}

	#[test]
	fn strips_leading_articles() {
		assert_eq!(canonicalize("The Beatles"), "beatles");
		assert_eq!(canonicalize("A Tribe Called Quest"), "tribe called quest");
		assert_eq!(canonicalize("An Horse"), "horse");
		assert_eq!(canonicalize("Theatre of Tragedy"), "theatre of tragedy");
	}

	#[test]
	fn ampersand_becomes_and() {
		assert_eq!(canonicalize("Simon & Garfunkel"), "simon and garfunkel");
		assert_eq!(canonicalize("Simon&Garfunkel"), "simon and garfunkel");
	}

	#[test]
	fn apostrophes_and_periods_removed() {
		assert_eq!(canonicalize("Guns N' Roses"), "guns n roses");
		assert_eq!(canonicalize("R.E.M."), "rem");
	}

	#[test]
	fn symbols_become_underscores() {
		assert_eq!(canonicalize("AC/DC"), "ac_dc");
		assert_eq!(canonicalize("Sigur Rós!"), "sigur ros_");
	}

	#[test]
	fn accents_removed() {
		assert_eq!(remove_accents("àbçdéfghîjkłmñö"), "abcdefghijkłmno");
		assert_eq!(canonicalize("Björk"), "bjork");
		assert_eq!(canonicalize("Beyoncé"), "beyonce");
	}

	#[test]
	fn letters_without_decomposition_become_underscores() {
		assert_eq!(canonicalize("Łona"), "_ona");
	}

	#[test]
	fn surrounding_whitespace_trimmed() {
		assert_eq!(canonicalize("  dEUS  "), "deus");
	}

	#[test]
	fn case_insensitive() {
		assert_eq!(canonicalize("dEUS"), canonicalize("Deus"));
	}

	#[test]
	fn idempotent() {
		let samples = [
			"Ms. Lauryn Hill",
			"The The",
			"the the band",
			"a & b",
			"A&",
			"  The   Notorious B.I.G.  ",
			"Ms. The Band",
			"Motörhead",
			"Sigur Rós",
			"!!!",
			"",
			"   ",
			"&",
			"AC/DC",
			"Earth, Wind & Fire",
			"Florence + the Machine",
		];
		for s in samples {
			let once = canonicalize(s);
			assert_eq!(canonicalize(&once), once, "not idempotent for {:?}", s);
		}
	}

	#[test]
	fn repeated_article_fully_stripped() {
		assert_eq!(canonicalize("the the band"), "band");
	}

	#[test]
	fn long_article_chains_reach_a_fixpoint() {
		let name = format!("{}band", "The ".repeat(40));
		let once = canonicalize(&name);
		assert_eq!(once, "band");
		assert_eq!(canonicalize(&once), once);
		assert_eq!(canonicalize(&format!("{}x", "a the ".repeat(25))), "x");
	}
}

//! Dual phonetic codes in the Double Metaphone family.
//!
//! Each word gets a primary and a secondary code of at most four symbols.
//! The secondary code captures the common alternate pronunciation
//! (`CH` as `K`, `TH` as `T`, initial `W` as `F`). `0` stands for the
//! "th" sound. Only ASCII letters contribute; accented Latin vowels are folded
//! first, everything else is skipped.

use super::distance::levenshtein;

const MAX_CODE_LEN: usize = 4;

/// Primary and secondary encodings of one word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneticCode {
    pub primary: String,
    pub secondary: String,
}

impl PhoneticCode {
    fn codes(&self) -> [&str; 2] {
        [&self.primary, &self.secondary]
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }
}

/// Two codes match when any pair is identical, or when both codes of a pair
/// are longer than one symbol and differ by at most one edit.
pub fn codes_match(a: &PhoneticCode, b: &PhoneticCode) -> bool {
    for x in a.codes() {
        for y in b.codes() {
            if x.is_empty() || y.is_empty() {
                continue;
            }
            if x == y {
                return true;
            }
            if x.len() > 1 && y.len() > 1 && levenshtein(x, y) <= 1 {
                return true;
            }
        }
    }
    false
}

/// Encode a word.
pub fn encode(word: &str) -> PhoneticCode {
    let letters: Vec<char> = word
        .chars()
        .filter_map(fold_letter)
        .collect();
    Encoder::new(letters).run()
}

fn fold_letter(ch: char) -> Option<char> {
    let upper = match ch {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ñ' | 'Ñ' => 'N',
        'ç' | 'Ç' => 'S',
        c if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
        _ => return None,
    };
    Some(upper)
}

fn is_vowel(ch: char) -> bool {
    matches!(ch, 'A' | 'E' | 'I' | 'O' | 'U' | 'Y')
}

struct Encoder {
    letters: Vec<char>,
    pos: usize,
    primary: String,
    secondary: String,
}

impl Encoder {
    fn new(letters: Vec<char>) -> Self {
        Self {
            letters,
            pos: 0,
            primary: String::new(),
            secondary: String::new(),
        }
    }

    fn at(&self, index: usize) -> char {
        self.letters.get(index).copied().unwrap_or('\0')
    }

    /// Letter at `pos + offset`; `'\0'` when out of range.
    fn peek(&self, offset: isize) -> char {
        let index = self.pos as isize + offset;
        if index < 0 {
            return '\0';
        }
        self.at(index as usize)
    }

    fn follows(&self, offset: isize, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek(offset + i as isize) == c)
    }

    fn follows_any(&self, offset: isize, options: &[&str]) -> bool {
        options.iter().any(|s| self.follows(offset, s))
    }

    fn add(&mut self, primary: &str, secondary: &str) {
        self.primary.push_str(primary);
        self.secondary.push_str(secondary);
    }

    fn both(&mut self, code: &str) {
        self.add(code, code);
    }

    fn last(&self) -> usize {
        self.letters.len().saturating_sub(1)
    }

    fn run(mut self) -> PhoneticCode {
        if self.follows_any(0, &["GN", "KN", "PN", "WR", "PS"]) {
            self.pos += 1;
        }
        if self.at(0) == 'X' {
            self.both("S");
            self.pos += 1;
        }

        while self.pos < self.letters.len()
            && (self.primary.len() < MAX_CODE_LEN || self.secondary.len() < MAX_CODE_LEN)
        {
            let step = self.step();
            self.pos += step;
        }

        self.primary.truncate(MAX_CODE_LEN);
        self.secondary.truncate(MAX_CODE_LEN);
        PhoneticCode {
            primary: self.primary,
            secondary: self.secondary,
        }
    }

    /// Emit code for the letter at `pos`; returns how many letters were consumed.
    fn step(&mut self) -> usize {
        let ch = self.at(self.pos);
        match ch {
            c if is_vowel(c) => {
                if self.pos == 0 {
                    self.both("A");
                }
                1
            }
            'B' => {
                self.both("P");
                if self.peek(1) == 'B' {
                    2
                } else {
                    1
                }
            }
            'C' => self.letter_c(),
            'D' => {
                if self.follows(0, "DG") {
                    if matches!(self.peek(2), 'I' | 'E' | 'Y') {
                        self.both("J");
                        3
                    } else {
                        self.both("TK");
                        2
                    }
                } else {
                    self.both("T");
                    if matches!(self.peek(1), 'T' | 'D') {
                        2
                    } else {
                        1
                    }
                }
            }
            'F' | 'V' => {
                self.both("F");
                if self.peek(1) == ch {
                    2
                } else {
                    1
                }
            }
            'G' => self.letter_g(),
            'H' => {
                if (self.pos == 0 || is_vowel(self.peek(-1))) && is_vowel(self.peek(1)) {
                    self.both("H");
                    2
                } else {
                    1
                }
            }
            'J' => {
                if self.pos == 0 && self.follows(0, "JOSE") {
                    self.both("H");
                } else if self.pos == 0 {
                    self.add("J", "A");
                } else {
                    self.add("J", "H");
                }
                if self.peek(1) == 'J' {
                    2
                } else {
                    1
                }
            }
            'K' | 'Q' => {
                self.both("K");
                if self.peek(1) == ch {
                    2
                } else {
                    1
                }
            }
            'L' | 'N' | 'R' => {
                let code = ch.to_string();
                self.both(&code);
                if self.peek(1) == ch {
                    2
                } else {
                    1
                }
            }
            'M' => {
                self.both("M");
                let silent_b = self.peek(-1) == 'U'
                    && self.peek(1) == 'B'
                    && (self.pos + 1 == self.last() || self.follows(2, "ER"));
                if silent_b || self.peek(1) == 'M' {
                    2
                } else {
                    1
                }
            }
            'P' => {
                if self.peek(1) == 'H' {
                    self.both("F");
                    2
                } else {
                    self.both("P");
                    if matches!(self.peek(1), 'P' | 'B') {
                        2
                    } else {
                        1
                    }
                }
            }
            'S' => self.letter_s(),
            'T' => self.letter_t(),
            'W' => {
                if self.follows(0, "WR") {
                    self.both("R");
                    2
                } else {
                    if self.pos == 0 && (is_vowel(self.peek(1)) || self.peek(1) == 'H') {
                        self.add("A", "F");
                    }
                    1
                }
            }
            'X' => {
                let silent = self.pos == self.last()
                    && (self.follows_any(-3, &["IAU", "EAU"]) || self.follows_any(-2, &["AU", "OU"]));
                if !silent {
                    self.both("KS");
                }
                if matches!(self.peek(1), 'C' | 'X') {
                    2
                } else {
                    1
                }
            }
            'Z' => {
                if self.peek(1) == 'H' {
                    self.both("J");
                    2
                } else {
                    if self.follows_any(1, &["ZO", "ZI", "ZA"]) {
                        self.add("S", "TS");
                    } else {
                        self.both("S");
                    }
                    if self.peek(1) == 'Z' {
                        2
                    } else {
                        1
                    }
                }
            }
            _ => 1,
        }
    }

    fn letter_c(&mut self) -> usize {
        if self.follows(0, "CIA") {
            self.both("X");
            return 3;
        }
        if self.follows(0, "CH") {
            if self.follows_any(2, &["R", "L"]) || (self.pos == 0 && self.follows_any(0, &["CHOR", "CHARAC", "CHEM"])) {
                self.both("K");
            } else if self.pos == 0 {
                self.both("X");
            } else {
                self.add("X", "K");
            }
            return 2;
        }
        if self.follows(0, "CZ") {
            self.add("S", "X");
            return 2;
        }
        if self.follows(0, "CC") && !(self.pos == 1 && self.at(0) == 'M') {
            if matches!(self.peek(2), 'I' | 'E' | 'H') && !self.follows(2, "HU") {
                self.both("KS");
                return 3;
            }
            self.both("K");
            return 2;
        }
        if self.follows_any(0, &["CK", "CG", "CQ"]) {
            self.both("K");
            return 2;
        }
        if self.follows_any(0, &["CI", "CE", "CY"]) {
            self.both("S");
            return 2;
        }
        self.both("K");
        if matches!(self.peek(1), 'C' | 'K' | 'Q') {
            2
        } else {
            1
        }
    }

    fn letter_g(&mut self) -> usize {
        let next = self.peek(1);
        if next == 'H' {
            if self.pos > 0 && !is_vowel(self.peek(-1)) {
                self.both("K");
                return 2;
            }
            if self.pos == 0 {
                if self.peek(2) == 'I' {
                    self.both("J");
                } else {
                    self.both("K");
                }
                return 2;
            }
            // "laugh", "cough", "tough"
            if self.peek(-1) == 'U' && matches!(self.peek(-3), 'C' | 'G' | 'L' | 'R' | 'T') {
                self.both("F");
            }
            return 2;
        }
        if next == 'N' {
            if self.pos == 1 && is_vowel(self.at(0)) {
                self.add("KN", "N");
            } else {
                self.add("N", "KN");
            }
            return 2;
        }
        if self.follows(1, "LI") {
            self.add("KL", "L");
            return 2;
        }
        if self.pos == 0
            && self.follows_any(1, &["ES", "EP", "EB", "EL", "EY", "IB", "IL", "IN", "IE", "EI", "ER"])
        {
            self.add("K", "J");
            return 2;
        }
        if matches!(next, 'E' | 'I' | 'Y') {
            if self.follows(1, "ET") {
                self.both("K");
            } else {
                self.add("J", "K");
            }
            return 2;
        }
        self.both("K");
        if next == 'G' {
            2
        } else {
            1
        }
    }

    fn letter_s(&mut self) -> usize {
        if self.follows_any(-1, &["ISL", "YSL"]) {
            return 1;
        }
        if self.pos == 0 && self.follows(0, "SUGAR") {
            self.add("X", "S");
            return 1;
        }
        if self.follows(0, "SH") {
            self.both("X");
            return 2;
        }
        if self.follows_any(0, &["SIO", "SIA"]) {
            self.add("S", "X");
            return 3;
        }
        if self.pos == 0 && matches!(self.peek(1), 'M' | 'N' | 'L' | 'W') {
            self.add("S", "X");
            return 1;
        }
        if self.follows(0, "SC") {
            if self.peek(2) == 'H' {
                self.both("SK");
            } else if matches!(self.peek(2), 'I' | 'E' | 'Y') {
                self.both("S");
            } else {
                self.both("SK");
            }
            return 3;
        }
        self.both("S");
        if matches!(self.peek(1), 'S' | 'Z') {
            2
        } else {
            1
        }
    }

    fn letter_t(&mut self) -> usize {
        if self.follows(0, "TION") {
            self.both("X");
            return 3;
        }
        if self.follows_any(0, &["TIA", "TCH"]) {
            self.both("X");
            return 3;
        }
        if self.follows(0, "TH") || self.follows(0, "TTH") {
            if self.follows_any(2, &["OM", "AM"]) {
                self.both("T");
            } else {
                self.add("0", "T");
            }
            return if self.peek(1) == 'T' { 3 } else { 2 };
        }
        self.both("T");
        if matches!(self.peek(1), 'T' | 'D') {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary(word: &str) -> String {
        encode(word).primary
    }

    #[test]
    fn simple_consonant_frames() {
        assert_eq!(primary("cat"), "KT");
        assert_eq!(primary("bat"), "PT");
        assert_eq!(primary("see"), "S");
        assert_eq!(primary("seer"), "SR");
    }

    #[test]
    fn ph_sounds_like_f() {
        assert_eq!(primary("phone"), "FN");
        assert_eq!(primary("fone"), "FN");
    }

    #[test]
    fn silent_letters() {
        assert_eq!(primary("knight"), "NT");
        assert_eq!(primary("night"), "NT");
        assert_eq!(primary("write"), "RT");
        assert_eq!(primary("thumb"), "0M");
    }

    #[test]
    fn th_has_t_alternate() {
        let code = encode("three");
        assert_eq!(code.primary, "0R");
        assert_eq!(code.secondary, "TR");
    }

    #[test]
    fn initial_vowel_is_a() {
        assert_eq!(primary("apple"), "APL");
        assert_eq!(primary("egg"), "AK");
    }

    #[test]
    fn codes_are_capped_at_four() {
        assert_eq!(primary("strawberry").len(), 4);
    }

    #[test]
    fn digits_have_no_code() {
        assert!(encode("42").is_empty());
    }

    #[test]
    fn identical_codes_match() {
        assert!(codes_match(&encode("knight"), &encode("night")));
    }

    #[test]
    fn near_codes_match_only_when_both_longer_than_one() {
        // SR vs S: one edit apart but "S" is a single symbol.
        assert!(!codes_match(&encode("seer"), &encode("see")));
        // ST vs SP: one edit apart, both two symbols.
        assert!(codes_match(&encode("sit"), &encode("sip")));
    }

    #[test]
    fn empty_codes_never_match() {
        assert!(!codes_match(&encode("2"), &encode("3")));
    }
}

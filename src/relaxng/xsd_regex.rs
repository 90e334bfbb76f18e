// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! XML Schema regular expressions.
//!
//! Rewrites the regular expression dialect of XML Schema `pattern` facets
//! into the syntax of the regex crate. The dialects disagree on more than
//! spelling: XML Schema has character class subtraction, `\p{Is...}` block
//! escapes, the `\i` and `\c` name escapes, and no anchors. Anything the
//! rewrite does not understand is rejected rather than passed through.
//!
//! The result is not anchored. XML Schema patterns always match the whole
//! value, so the caller wraps the result in `^(?:...)$`.

/// Characters allowed to start an XML name.
const NAME_START: &str = concat!(
    r"A-Z_a-z:\x{C0}-\x{D6}\x{D8}-\x{F6}\x{F8}-\x{2FF}\x{370}-\x{37D}",
    r"\x{37F}-\x{1FFF}\x{200C}-\x{200D}\x{2070}-\x{218F}\x{2C00}-\x{2FEF}",
    r"\x{3001}-\x{D7FF}\x{F900}-\x{FDCF}\x{FDF0}-\x{FFFD}\x{10000}-\x{EFFFF}",
);

/// Characters allowed inside an XML name on top of [`NAME_START`].
const NAME_REST: &str = r"\-.0-9\x{B7}\x{300}-\x{36F}\x{203F}-\x{2040}";

const CATEGORIES: &[&str] = &[
    "L", "Lu", "Ll", "Lt", "Lm", "Lo", "M", "Mn", "Mc", "Me", "N", "Nd", "Nl", "No", "P", "Pc",
    "Pd", "Ps", "Pe", "Pi", "Pf", "Po", "Z", "Zs", "Zl", "Zp", "S", "Sm", "Sc", "Sk", "So", "C",
    "Cc", "Cf", "Co", "Cn",
];

/// Unicode 3.1 blocks that XML Schema names with `\p{Is...}`.
///
/// Surrogate blocks are left out, the regex crate only matches scalar
/// values.
const BLOCKS: &[(&str, &[(u32, u32)])] = &[
    ("BasicLatin", &[(0x0000, 0x007F)]),
    ("Latin-1Supplement", &[(0x0080, 0x00FF)]),
    ("LatinExtended-A", &[(0x0100, 0x017F)]),
    ("LatinExtended-B", &[(0x0180, 0x024F)]),
    ("IPAExtensions", &[(0x0250, 0x02AF)]),
    ("SpacingModifierLetters", &[(0x02B0, 0x02FF)]),
    ("CombiningDiacriticalMarks", &[(0x0300, 0x036F)]),
    ("Greek", &[(0x0370, 0x03FF)]),
    ("Cyrillic", &[(0x0400, 0x04FF)]),
    ("Armenian", &[(0x0530, 0x058F)]),
    ("Hebrew", &[(0x0590, 0x05FF)]),
    ("Arabic", &[(0x0600, 0x06FF)]),
    ("Syriac", &[(0x0700, 0x074F)]),
    ("Thaana", &[(0x0780, 0x07BF)]),
    ("Devanagari", &[(0x0900, 0x097F)]),
    ("Bengali", &[(0x0980, 0x09FF)]),
    ("Gurmukhi", &[(0x0A00, 0x0A7F)]),
    ("Gujarati", &[(0x0A80, 0x0AFF)]),
    ("Oriya", &[(0x0B00, 0x0B7F)]),
    ("Tamil", &[(0x0B80, 0x0BFF)]),
    ("Telugu", &[(0x0C00, 0x0C7F)]),
    ("Kannada", &[(0x0C80, 0x0CFF)]),
    ("Malayalam", &[(0x0D00, 0x0D7F)]),
    ("Sinhala", &[(0x0D80, 0x0DFF)]),
    ("Thai", &[(0x0E00, 0x0E7F)]),
    ("Lao", &[(0x0E80, 0x0EFF)]),
    ("Tibetan", &[(0x0F00, 0x0FFF)]),
    ("Myanmar", &[(0x1000, 0x109F)]),
    ("Georgian", &[(0x10A0, 0x10FF)]),
    ("HangulJamo", &[(0x1100, 0x11FF)]),
    ("Ethiopic", &[(0x1200, 0x137F)]),
    ("Cherokee", &[(0x13A0, 0x13FF)]),
    ("UnifiedCanadianAboriginalSyllabics", &[(0x1400, 0x167F)]),
    ("Ogham", &[(0x1680, 0x169F)]),
    ("Runic", &[(0x16A0, 0x16FF)]),
    ("Khmer", &[(0x1780, 0x17FF)]),
    ("Mongolian", &[(0x1800, 0x18AF)]),
    ("LatinExtendedAdditional", &[(0x1E00, 0x1EFF)]),
    ("GreekExtended", &[(0x1F00, 0x1FFF)]),
    ("GeneralPunctuation", &[(0x2000, 0x206F)]),
    ("SuperscriptsandSubscripts", &[(0x2070, 0x209F)]),
    ("CurrencySymbols", &[(0x20A0, 0x20CF)]),
    ("CombiningMarksforSymbols", &[(0x20D0, 0x20FF)]),
    ("LetterlikeSymbols", &[(0x2100, 0x214F)]),
    ("NumberForms", &[(0x2150, 0x218F)]),
    ("Arrows", &[(0x2190, 0x21FF)]),
    ("MathematicalOperators", &[(0x2200, 0x22FF)]),
    ("MiscellaneousTechnical", &[(0x2300, 0x23FF)]),
    ("ControlPictures", &[(0x2400, 0x243F)]),
    ("OpticalCharacterRecognition", &[(0x2440, 0x245F)]),
    ("EnclosedAlphanumerics", &[(0x2460, 0x24FF)]),
    ("BoxDrawing", &[(0x2500, 0x257F)]),
    ("BlockElements", &[(0x2580, 0x259F)]),
    ("GeometricShapes", &[(0x25A0, 0x25FF)]),
    ("MiscellaneousSymbols", &[(0x2600, 0x26FF)]),
    ("Dingbats", &[(0x2700, 0x27BF)]),
    ("BraillePatterns", &[(0x2800, 0x28FF)]),
    ("CJKRadicalsSupplement", &[(0x2E80, 0x2EFF)]),
    ("KangxiRadicals", &[(0x2F00, 0x2FDF)]),
    ("IdeographicDescriptionCharacters", &[(0x2FF0, 0x2FFF)]),
    ("CJKSymbolsandPunctuation", &[(0x3000, 0x303F)]),
    ("Hiragana", &[(0x3040, 0x309F)]),
    ("Katakana", &[(0x30A0, 0x30FF)]),
    ("Bopomofo", &[(0x3100, 0x312F)]),
    ("HangulCompatibilityJamo", &[(0x3130, 0x318F)]),
    ("Kanbun", &[(0x3190, 0x319F)]),
    ("BopomofoExtended", &[(0x31A0, 0x31BF)]),
    ("EnclosedCJKLettersandMonths", &[(0x3200, 0x32FF)]),
    ("CJKCompatibility", &[(0x3300, 0x33FF)]),
    ("CJKUnifiedIdeographsExtensionA", &[(0x3400, 0x4DB5)]),
    ("CJKUnifiedIdeographs", &[(0x4E00, 0x9FFF)]),
    ("YiSyllables", &[(0xA000, 0xA48F)]),
    ("YiRadicals", &[(0xA490, 0xA4CF)]),
    ("HangulSyllables", &[(0xAC00, 0xD7A3)]),
    ("PrivateUse", &[(0xE000, 0xF8FF), (0xF0000, 0x10FFFF)]),
    ("CJKCompatibilityIdeographs", &[(0xF900, 0xFAFF)]),
    ("AlphabeticPresentationForms", &[(0xFB00, 0xFB4F)]),
    ("ArabicPresentationForms-A", &[(0xFB50, 0xFDFF)]),
    ("CombiningHalfMarks", &[(0xFE20, 0xFE2F)]),
    ("CJKCompatibilityForms", &[(0xFE30, 0xFE4F)]),
    ("SmallFormVariants", &[(0xFE50, 0xFE6F)]),
    ("ArabicPresentationForms-B", &[(0xFE70, 0xFEFE)]),
    ("Specials", &[(0xFEFF, 0xFEFF), (0xFFF0, 0xFFFD)]),
    ("HalfwidthandFullwidthForms", &[(0xFF00, 0xFFEF)]),
    ("OldItalic", &[(0x10300, 0x1032F)]),
    ("Gothic", &[(0x10330, 0x1034F)]),
    ("Deseret", &[(0x10400, 0x1044F)]),
    ("ByzantineMusicalSymbols", &[(0x1D000, 0x1D0FF)]),
    ("MusicalSymbols", &[(0x1D100, 0x1D1FF)]),
    ("MathematicalAlphanumericSymbols", &[(0x1D400, 0x1D7FF)]),
    ("CJKUnifiedIdeographsExtensionB", &[(0x20000, 0x2A6D6)]),
    ("CJKCompatibilityIdeographsSupplement", &[(0x2F800, 0x2FA1F)]),
    ("Tags", &[(0xE0000, 0xE007F)]),
];

/// Rewrite XML Schema regular expression for the regex crate.
///
/// # Errors
///
/// - Return [`PatternError::Syntax`] if the expression is malformed, or uses
///   a construct XML Schema does not have, like back references, lazy
///   quantifiers, or `(?` groups.
/// - Return [`PatternError::UnknownProperty`] if a `\p{...}` escape names
///   neither a general category nor a block.
pub fn translate(pattern: &str) -> Result<String> {
    let mut translator = Translator {
        chars: pattern.chars().collect(),
        pos: 0,
    };
    let translated = translator.reg_exp()?;

    match translator.peek() {
        None => Ok(translated),
        Some(')') => Err(translator.syntax("unmatched ')'")),
        Some(_) => Err(translator.syntax("unexpected character")),
    }
}

/// Single character or set of characters named by an escape.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Escape {
    Char(char),

    /// Class expression valid both on its own and nested in a class.
    Set(String),
}

impl Escape {
    fn render(self) -> String {
        match self {
            Escape::Char(chr) => regex::escape(chr.encode_utf8(&mut [0; 4])),
            Escape::Set(set) => set,
        }
    }
}

struct Translator {
    chars: Vec<char>,
    pos: usize,
}

impl Translator {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let chr = self.peek()?;
        self.pos += 1;
        Some(chr)
    }

    fn syntax(&self, message: impl Into<String>) -> PatternError {
        PatternError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn reg_exp(&mut self) -> Result<String> {
        let mut branches = vec![self.branch()?];
        while self.peek() == Some('|') {
            self.pos += 1;
            branches.push(self.branch()?);
        }

        Ok(branches.join("|"))
    }

    fn branch(&mut self) -> Result<String> {
        let mut branch = String::new();
        while let Some(chr) = self.peek() {
            if matches!(chr, '|' | ')') {
                break;
            }
            branch.push_str(&self.atom()?);
            branch.push_str(&self.quantifier()?);
        }

        Ok(branch)
    }

    fn atom(&mut self) -> Result<String> {
        let Some(chr) = self.peek() else {
            return Err(self.syntax("unexpected end of expression"));
        };

        let atom = match chr {
            '(' => {
                self.pos += 1;
                if self.peek() == Some('?') {
                    return Err(self.syntax("'(?' groups are not XML Schema syntax"));
                }
                let inner = self.reg_exp()?;
                if self.bump() != Some(')') {
                    return Err(self.syntax("unterminated group"));
                }
                format!("(?:{inner})")
            }
            '[' => {
                self.pos += 1;
                self.class()?
            }
            '\\' => {
                self.pos += 1;
                self.escape()?.render()
            }
            '.' => {
                self.pos += 1;
                r"[^\n\r]".to_string()
            }
            '?' | '*' | '+' | '{' => return Err(self.syntax("quantifier without atom")),
            ']' | '}' => return Err(self.syntax(format!("unescaped {chr:?}"))),
            _ => {
                self.pos += 1;
                Escape::Char(chr).render()
            }
        };

        Ok(atom)
    }

    fn quantifier(&mut self) -> Result<String> {
        let quantifier = match self.peek() {
            Some(chr @ ('?' | '*' | '+')) => {
                self.pos += 1;
                chr.to_string()
            }
            Some('{') => {
                self.pos += 1;
                self.quantity()?
            }
            _ => return Ok(String::new()),
        };

        if matches!(self.peek(), Some('?' | '*' | '+' | '{')) {
            return Err(self.syntax("repeated quantifier"));
        }

        Ok(quantifier)
    }

    fn quantity(&mut self) -> Result<String> {
        let min = self
            .number()?
            .ok_or_else(|| self.syntax("missing lower bound in quantity"))?;

        let quantity = match self.bump() {
            Some('}') => format!("{{{min}}}"),
            Some(',') => match self.number()? {
                Some(max) if max < min => return Err(self.syntax("quantity bounds out of order")),
                Some(max) => {
                    if self.bump() != Some('}') {
                        return Err(self.syntax("unterminated quantity"));
                    }
                    format!("{{{min},{max}}}")
                }
                None => {
                    if self.bump() != Some('}') {
                        return Err(self.syntax("unterminated quantity"));
                    }
                    format!("{{{min},}}")
                }
            },
            _ => return Err(self.syntax("unterminated quantity")),
        };

        Ok(quantity)
    }

    fn number(&mut self) -> Result<Option<u32>> {
        let start = self.pos;
        while self.peek().is_some_and(|chr| chr.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }

        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .map(Some)
            .map_err(|_| self.syntax("quantity too large"))
    }

    /// Translate class after its opening bracket up to its closing bracket.
    fn class(&mut self) -> Result<String> {
        let negated = self.peek() == Some('^');
        if negated {
            self.pos += 1;
        }

        let mut items = String::new();
        let mut empty = true;
        let mut subtracted = None;
        loop {
            let Some(chr) = self.peek() else {
                return Err(self.syntax("unterminated character class"));
            };

            match chr {
                ']' if empty => return Err(self.syntax("empty character class")),
                ']' => {
                    self.pos += 1;
                    break;
                }
                '-' if self.peek_at(1) == Some('[') => {
                    if empty {
                        return Err(self.syntax("subtraction from empty character class"));
                    }
                    self.pos += 2;
                    subtracted = Some(self.class()?);
                    if self.bump() != Some(']') {
                        return Err(self.syntax("subtraction must end its character class"));
                    }
                    break;
                }
                '-' if empty || self.peek_at(1) == Some(']') => {
                    self.pos += 1;
                    items.push_str(&class_char('-'));
                }
                '-' => return Err(self.syntax("unescaped '-' inside character class")),
                '[' => return Err(self.syntax("unescaped '[' inside character class")),
                _ => items.push_str(&self.class_item()?),
            }
            empty = false;
        }

        let caret = if negated { "^" } else { "" };
        let class = match subtracted {
            Some(subtracted) => format!("[[{caret}{items}]--{subtracted}]"),
            None => format!("[{caret}{items}]"),
        };

        Ok(class)
    }

    fn class_item(&mut self) -> Result<String> {
        let start = match self.bump() {
            Some('\\') => match self.escape()? {
                Escape::Char(chr) => chr,
                Escape::Set(set) => return Ok(set),
            },
            Some(chr) => chr,
            None => return Err(self.syntax("unterminated character class")),
        };

        let is_range = self.peek() == Some('-') && !matches!(self.peek_at(1), None | Some('[' | ']'));
        if !is_range {
            return Ok(class_char(start));
        }

        self.pos += 1;
        let end = match self.bump() {
            Some('\\') => match self.escape()? {
                Escape::Char(chr) => chr,
                Escape::Set(_) => return Err(self.syntax("multi-character escape ends range")),
            },
            Some('[') => return Err(self.syntax("unescaped '[' inside character class")),
            Some(chr) => chr,
            None => return Err(self.syntax("unterminated character class")),
        };
        if end < start {
            return Err(self.syntax("character range out of order"));
        }

        Ok(format!("{}-{}", class_char(start), class_char(end)))
    }

    /// Translate escape after its backslash.
    fn escape(&mut self) -> Result<Escape> {
        let Some(chr) = self.bump() else {
            return Err(self.syntax("trailing backslash"));
        };

        let escape = match chr {
            'n' => Escape::Char('\n'),
            'r' => Escape::Char('\r'),
            't' => Escape::Char('\t'),
            '\\' | '|' | '.' | '?' | '*' | '+' | '(' | ')' | '{' | '}' | '-' | '[' | ']' | '^' => {
                Escape::Char(chr)
            }
            's' => Escape::Set(r"[\x{20}\t\n\r]".to_string()),
            'S' => Escape::Set(r"[^\x{20}\t\n\r]".to_string()),
            'd' => Escape::Set(r"\p{Nd}".to_string()),
            'D' => Escape::Set(r"\P{Nd}".to_string()),
            'w' => Escape::Set(r"[^\p{P}\p{Z}\p{C}]".to_string()),
            'W' => Escape::Set(r"[\p{P}\p{Z}\p{C}]".to_string()),
            'i' => Escape::Set(format!("[{NAME_START}]")),
            'I' => Escape::Set(format!("[^{NAME_START}]")),
            'c' => Escape::Set(format!("[{NAME_START}{NAME_REST}]")),
            'C' => Escape::Set(format!("[^{NAME_START}{NAME_REST}]")),
            'p' | 'P' => self.property(chr == 'P')?,
            _ => return Err(self.syntax(format!("unknown escape '\\{chr}'"))),
        };

        Ok(escape)
    }

    fn property(&mut self, negated: bool) -> Result<Escape> {
        if self.bump() != Some('{') {
            return Err(self.syntax("expected '{' after property escape"));
        }

        let mut name = String::new();
        loop {
            match self.bump() {
                Some('}') => break,
                Some(chr) => name.push(chr),
                None => return Err(self.syntax("unterminated property escape")),
            }
        }

        if let Some(block) = name.strip_prefix("Is") {
            let (_, ranges) = BLOCKS
                .iter()
                .find(|(known, _)| *known == block)
                .ok_or_else(|| PatternError::UnknownProperty { name: name.clone() })?;
            let ranges: String = ranges
                .iter()
                .map(|(start, end)| format!(r"\x{{{start:X}}}-\x{{{end:X}}}"))
                .collect();
            let caret = if negated { "^" } else { "" };
            return Ok(Escape::Set(format!("[{caret}{ranges}]")));
        }

        if !CATEGORIES.contains(&name.as_str()) {
            return Err(PatternError::UnknownProperty { name });
        }

        let letter = if negated { 'P' } else { 'p' };
        Ok(Escape::Set(format!(r"\{letter}{{{name}}}")))
    }
}

fn class_char(chr: char) -> String {
    format!(r"\x{{{:X}}}", u32::from(chr))
}

/// XML Schema regular expression error types.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("{message} at offset {offset}")]
    Syntax { offset: usize, message: String },

    #[error("unknown character property {name:?}")]
    UnknownProperty { name: String },

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Friendly result alias :3
pub type Result<T, E = PatternError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use simple_test_case::test_case;

    fn compile(pattern: &str) -> Regex {
        let translated = translate(pattern).unwrap();
        Regex::new(&format!("^(?:{translated})$")).unwrap()
    }

    #[test_case("[a-z-[aeiou]]+", "bcd", true; "subtraction keeps rest")]
    #[test_case("[a-z-[aeiou]]+", "bad", false; "subtraction removes vowels")]
    #[test_case("[^a-z-[0-9]]", "5", false; "negated base stays negated")]
    #[test_case("[^a-z-[0-9]]", "A", true; "negated base outside range")]
    #[test_case("[a-z-[b-y-[m]]]", "m", true; "nested subtraction")]
    #[test_case(r"\p{IsBasicLatin}+", "plain", true; "block accepts ascii")]
    #[test_case(r"\p{IsBasicLatin}+", "caf\u{e9}", false; "block rejects outside")]
    #[test_case(r"\P{IsBasicLatin}", "\u{e9}", true; "negated block")]
    #[test_case(r"[\p{IsGreek}a]+", "a\u{3b1}", true; "block inside class")]
    #[test_case(r"\p{Lu}\d+", "A12", true; "category escapes")]
    #[test_case("a^b$", "a^b$", true; "anchors are literal")]
    #[test_case(".", "\n", false; "dot skips newline")]
    #[test_case(r"[-a]+", "-a-", true; "leading dash literal")]
    #[test_case(r"[a-]+", "a-", true; "trailing dash literal")]
    #[test_case(r"\i\c*", "x86_64", true; "name escapes")]
    #[test_case(r"\i\c*", "9lives", false; "name start")]
    #[test_case(r"(ab|cd){2}", "abcd", true; "group quantity")]
    #[test_case(r"\s\S", " x", true; "space escapes")]
    #[test]
    fn translated_match(pattern: &str, text: &str, expect: bool) {
        assert_eq!(compile(pattern).is_match(text), expect);
    }

    #[test_case("(?i)abc"; "inline flags")]
    #[test_case(r"(a)\1"; "back reference")]
    #[test_case("a+?"; "lazy quantifier")]
    #[test_case("*a"; "dangling quantifier")]
    #[test_case("a{3,1}"; "bounds out of order")]
    #[test_case("[]"; "empty class")]
    #[test_case("[a-c-e]"; "dash mid class")]
    #[test_case("[z-a]"; "reversed range")]
    #[test_case("[a-z-[aeiou]x]"; "subtraction not last")]
    #[test_case("(ab"; "unterminated group")]
    #[test_case("ab)"; "unmatched paren")]
    #[test_case(r"\p{Xx}"; "unknown category")]
    #[test_case(r"\p{IsKlingon}"; "unknown block")]
    #[test_case(r"\p{IsHighSurrogates}"; "surrogate block")]
    #[test]
    fn rejects_untranslatable(pattern: &str) {
        assert!(translate(pattern).is_err(), "{pattern:?} was accepted");
    }

    #[test]
    fn reports_offset_of_syntax_error() {
        match translate("ab(?x)") {
            Err(PatternError::Syntax { offset, .. }) => assert_eq!(offset, 3),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

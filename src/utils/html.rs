use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Question prompts and essay answers may carry rich text from editors on
/// either side of the system. This employs a whitelist-based sanitization
/// strategy: it preserves safe tags (like <b>, <p>) while stripping
/// dangerous tags (like <script>, <iframe>) and malicious attributes
/// (like onclick), as a fail-safe against stored XSS in the grading and
/// review screens.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Extract the program text from an LLM response.
///
/// Preference order: a fenced block tagged with `language`, then the
/// first fenced block of any language, then the entire response.
pub fn extract_code_block(response: &str, language: &str) -> String {
    if !language.is_empty() {
        if let Some(code) = find_fence(response, Some(language)) {
            return code;
        }
    }
    if let Some(code) = find_fence(response, None) {
        return code;
    }
    response.to_string()
}

fn find_fence(response: &str, language: Option<&str>) -> Option<String> {
    let mut search_from = 0;
    loop {
        let open_rel = response[search_from..].find("```")?;
        let open = search_from + open_rel;
        let after_ticks = open + 3;
        let info_end = response[after_ticks..]
            .find('\n')
            .map(|i| after_ticks + i)?;
        let info = response[after_ticks..info_end].trim();

        let matches = match language {
            Some(lang) => info.eq_ignore_ascii_case(lang),
            None => true,
        };

        let body_start = info_end + 1;
        let close_rel = response[body_start..].find("```");
        match close_rel {
            Some(rel) if matches => {
                return Some(response[body_start..body_start + rel].to_string());
            }
            Some(rel) => {
                // Skip past this fence and keep scanning.
                search_from = body_start + rel + 3;
            }
            None => return None,
        }
    }
}

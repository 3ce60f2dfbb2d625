use std::collections::{HashMap, HashSet};

use url::Url;

use crate::classify::{image_width, is_default_variant, is_preview_variant};
use crate::config::FilterRules;
use crate::models::MediaGroup;

/// Query keys that only select size, quality or encoding.
const RESIZE_KEYS: &[&str] = &["w", "h", "width", "height", "q", "quality", "format", "x-oss-process"];

/// Bare query keys such as `imageView2/2/w/480` that start with these prefixes.
const RESIZE_KEY_PREFIXES: &[&str] = &["imageview2", "imagemogr2"];

/// `url` with sizing parameters and `!style` variant markers removed.
pub fn base_key(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let path = parsed.path().split('!').next().unwrap_or("").to_string();
    parsed.set_path(&path);

    let kept: Vec<&str> = parsed
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty() && !is_resize_pair(pair))
        .collect();
    let query = kept.join("&");
    parsed.set_query(if query.is_empty() { None } else { Some(query.as_str()) });
    parsed.set_fragment(None);

    parsed.to_string()
}

fn is_resize_pair(pair: &str) -> bool {
    let key = pair.split('=').next().unwrap_or("").to_ascii_lowercase();
    RESIZE_KEYS.contains(&key.as_str())
        || RESIZE_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Group URLs by base key; groups and variants keep discovery order.
pub fn group_by_base(urls: &[String]) -> Vec<MediaGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<MediaGroup> = Vec::new();

    for url in urls {
        let key = base_key(url);
        match index.get(&key) {
            Some(&i) => {
                if !groups[i].variants.contains(url) {
                    groups[i].variants.push(url.clone());
                }
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(MediaGroup {
                    base_key: key,
                    variants: vec![url.clone()],
                });
            }
        }
    }

    groups
}

/// Pick one variant: default marker, then widest above the threshold, then first seen.
pub fn pick_best(group: &MediaGroup, rules: &FilterRules) -> Option<String> {
    let variants = &group.variants;
    if variants.len() <= 1 {
        return variants.first().cloned();
    }

    if let Some(url) = variants
        .iter()
        .find(|u| is_default_variant(u) && !is_preview_variant(u))
    {
        return Some(url.clone());
    }

    let mut best: Option<(u32, &String)> = None;
    for url in variants {
        if let Some(width) = image_width(url).filter(|w| *w >= rules.min_width) {
            if best.map(|(w, _)| width > w).unwrap_or(true) {
                best = Some((width, url));
            }
        }
    }
    if let Some((_, url)) = best {
        return Some(url.clone());
    }

    variants.first().cloned()
}

/// One URL per logical image, in order of first discovery.
pub fn dedupe_images(urls: &[String], rules: &FilterRules) -> Vec<String> {
    group_by_base(urls)
        .iter()
        .filter_map(|group| pick_best(group, rules))
        .collect()
}

/// Drop exact repeats, keeping first occurrence.
pub fn dedupe_exact(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

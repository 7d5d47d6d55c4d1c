//! Sticker decorations: a closed catalogue of static assets.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sticker {
    pub id: &'static str,
    pub label: &'static str,
    pub asset_url: &'static str,
}

/// Every sticker a letter can carry.
pub const STICKERS: &[Sticker] = &[
    Sticker {
        id: "bday",
        label: "Birthday",
        asset_url: "/background-stickers/bday-icon.png",
    },
    Sticker {
        id: "shantal",
        label: "Shantal",
        asset_url: "/background-stickers/shantal-sticker.png",
    },
    Sticker {
        id: "loopy",
        label: "Loopy",
        asset_url: "/background-stickers/loopy2.png",
    },
];

pub fn catalogue() -> &'static [Sticker] {
    STICKERS
}

pub fn find(id: &str) -> Option<&'static Sticker> {
    STICKERS.iter().find(|s| s.id == id)
}

/// Asset URL for a stored sticker id. Unknown or absent ids resolve to
/// nothing.
pub fn resolve(id: Option<&str>) -> Option<&'static str> {
    id.and_then(find).map(|s| s.asset_url)
}

use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::{Attribute, Path, Token};

/// 把所需派生合并进已有的 derive 属性，并置于属性列表最前
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) {
    let mut retained = Vec::new();
    let mut existing = Vec::new();

    for attr in attrs.drain(..) {
        if !attr.path().is_ident("derive") {
            retained.push(attr);
            continue;
        }
        match attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated) {
            Ok(list) => existing.extend(list),
            // 无法解析的 derive 原样保留，交给编译器报错
            Err(_) => retained.push(attr),
        }
    }

    let mut seen = std::collections::HashSet::new();
    let merged: Vec<Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| seen.insert(derive_key(p)))
        .collect();

    *attrs = std::iter::once(syn::parse_quote!(#[derive(#(#merged),*)]))
        .chain(retained)
        .collect();
}

// 归一化 derive 的 key：Serialize 与 serde::Serialize 视为同一个
fn derive_key(p: &Path) -> String {
    match p.segments.last() {
        Some(last) => match last.ident.to_string().as_str() {
            name @ ("Serialize" | "Deserialize") => format!("serde::{name}"),
            name => name.to_string(),
        },
        None => p.to_token_stream().to_string(),
    }
}

//! Produces the self-contained source text that the worker compiles around a
//! declaring type.
//!
//! The harness embeds the text inside a private module, so anything that only
//! makes sense at a crate root or relative to sibling files is removed, and
//! item visibility is widened so the generated driver can reach nested types.

use quote::ToTokens;
use syn::{Attribute, ImplItem, Item, UseTree, Visibility};

use super::attribute::{INTERCEPTS_LOCATION, PRECOMPUTE, is_named};

pub fn declaring_source(file: &syn::File) -> String {
    let items = sanitize_items(&file.items, true);
    let mut tokens = proc_macro2::TokenStream::new();
    for item in &items {
        item.to_tokens(&mut tokens);
    }
    tokens.to_string()
}

fn sanitize_items(items: &[Item], top_level: bool) -> Vec<Item> {
    items
        .iter()
        .filter(|item| keep_item(item, top_level))
        .cloned()
        .map(sanitize_item)
        .collect()
}

fn keep_item(item: &Item, top_level: bool) -> bool {
    if item_attrs(item).is_some_and(|attrs| attrs.iter().any(is_cfg_test)) {
        return false;
    }
    match item {
        Item::Mod(module) => module.content.is_some(),
        Item::Use(item_use) if top_level => !imports_outside_file(&item_use.tree),
        _ => true,
    }
}

fn sanitize_item(mut item: Item) -> Item {
    match &mut item {
        Item::Mod(module) => {
            module.vis = public();
            if let Some((_, content)) = &mut module.content {
                *content = sanitize_items(content, false);
            }
        }
        Item::Impl(item_impl) => {
            item_impl.attrs.retain(|attr| !is_cfg_test(attr));
            let inherent = item_impl.trait_.is_none();
            item_impl.items.retain(|impl_item| match impl_item {
                ImplItem::Fn(method) => !method.attrs.iter().any(is_cfg_test),
                ImplItem::Const(constant) => !constant.attrs.iter().any(is_cfg_test),
                _ => true,
            });
            for impl_item in &mut item_impl.items {
                if let ImplItem::Fn(method) = impl_item {
                    method.attrs.retain(|attr| {
                        !is_named(attr, PRECOMPUTE) && !is_named(attr, INTERCEPTS_LOCATION)
                    });
                    if inherent {
                        method.vis = public();
                    }
                }
            }
        }
        Item::Struct(item) => item.vis = public(),
        Item::Enum(item) => item.vis = public(),
        Item::Union(item) => item.vis = public(),
        Item::Fn(item) => item.vis = public(),
        Item::Const(item) => item.vis = public(),
        Item::Static(item) => item.vis = public(),
        Item::Type(item) => item.vis = public(),
        Item::Trait(item) => item.vis = public(),
        _ => {}
    }
    item
}

fn public() -> Visibility {
    Visibility::Public(syn::Token![pub](proc_macro2::Span::call_site()))
}

pub(super) fn is_cfg_test(attr: &Attribute) -> bool {
    attr.path().is_ident("cfg")
        && attr
            .meta
            .require_list()
            .is_ok_and(|list| list.tokens.to_string() == "test")
}

fn imports_outside_file(tree: &UseTree) -> bool {
    match tree {
        UseTree::Path(path) => path.ident == "crate" || path.ident == "super",
        UseTree::Name(name) => name.ident == "crate" || name.ident == "super",
        UseTree::Rename(rename) => rename.ident == "crate" || rename.ident == "super",
        UseTree::Group(group) => group.items.iter().any(imports_outside_file),
        UseTree::Glob(_) => false,
    }
}

fn item_attrs(item: &Item) -> Option<&[Attribute]> {
    let attrs = match item {
        Item::Const(item) => &item.attrs,
        Item::Enum(item) => &item.attrs,
        Item::ExternCrate(item) => &item.attrs,
        Item::Fn(item) => &item.attrs,
        Item::ForeignMod(item) => &item.attrs,
        Item::Impl(item) => &item.attrs,
        Item::Macro(item) => &item.attrs,
        Item::Mod(item) => &item.attrs,
        Item::Static(item) => &item.attrs,
        Item::Struct(item) => &item.attrs,
        Item::Trait(item) => &item.attrs,
        Item::TraitAlias(item) => &item.attrs,
        Item::Type(item) => &item.attrs,
        Item::Union(item) => &item.attrs,
        Item::Use(item) => &item.attrs,
        _ => return None,
    };
    Some(attrs)
}

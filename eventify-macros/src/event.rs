use crate::utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, LitStr, MetaNameValue, Result, Token, parse::Parse, parse::ParseStream};

/// #[event] 宏实现
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = syn::parse_macro_input!(attr as EventAttrConfig);
    let mut input = syn::parse_macro_input!(item as Item);

    let (ident, generics, attrs) = match &mut input {
        Item::Struct(s) => (s.ident.clone(), s.generics.clone(), &mut s.attrs),
        Item::Enum(e) => (e.ident.clone(), e.generics.clone(), &mut e.attrs),
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on struct or enum types")
                .to_compile_error()
                .into();
        }
    };

    // 事件类型键是类型级常量，泛型事件无法给出唯一的键
    if !generics.params.is_empty() {
        return syn::Error::new(generics.span(), "#[event] does not support generic types")
            .to_compile_error()
            .into();
    }

    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    apply_derives(attrs, required);

    let name = cfg
        .name
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    let out: proc_macro2::TokenStream = quote! {
        #input

        impl ::eventify_core::event::Event for #ident {
            const EVENT_TYPE: &'static str = #name;
        }
    };

    TokenStream::from(out)
}

// 解析键值参数：name = "..."
struct EventAttrConfig {
    name: Option<LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut name: Option<LitStr> = None;

        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated(input)?;
        for kv in pairs {
            if !kv.path.is_ident("name") {
                return Err(syn::Error::new(kv.path.span(), "unknown key; expected 'name'"));
            }
            if name.is_some() {
                return Err(syn::Error::new(
                    kv.path.span(),
                    "duplicate key 'name' in attribute",
                ));
            }
            let lit = match kv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(lit),
                    ..
                }) => lit,
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        "expected string literal for 'name'",
                    ));
                }
            };
            if lit.value().trim().is_empty() {
                return Err(syn::Error::new(lit.span(), "'name' must not be empty"));
            }
            name = Some(lit);
        }

        Ok(Self { name })
    }
}

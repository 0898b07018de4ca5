//! # 错误派生宏
//!
//! 提供 `#[derive(Error)]`，为错误枚举生成 `Display` 与 `ErrorKind` 实现。
//!
//! ```rust,ignore
//! use error::Error;
//!
//! #[derive(Debug, Error)]
//! enum SpoolError {
//!     #[error("请求不存在: {0}")]
//!     #[code(7003)]
//!     Missing(String),
//!
//!     #[error("颁发机构 {authority} 序列号冲突")]
//!     Conflict { authority: String },
//!
//!     #[error("操作被取消")]
//!     Cancelled,
//! }
//! ```
//!
//! 变体未标注 `#[code(..)]` 时，错误码按声明顺序从 1 开始编号。

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitInt, LitStr, Variant};

/// Error 派生宏
///
/// # 属性
///
/// - `#[error("消息")]`：错误消息，`{0}` 引用元组字段，`{name}` 引用命名字段
/// - `#[code(N)]`：稳定的错误码
#[proc_macro_derive(Error, attributes(error, code))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return Err(syn::Error::new_spanned(input, "Error 派生宏只能用于枚举类型"));
        }
    };

    let mut display_arms = Vec::with_capacity(variants.len());
    let mut code_arms = Vec::with_capacity(variants.len());

    for (idx, variant) in variants.iter().enumerate() {
        let message = error_message(variant)?;
        display_arms.push(display_arm(variant, &message));

        let code = match error_code(&variant.attrs)? {
            Some(code) => code,
            None => idx as u32 + 1,
        };
        let pattern = wildcard_pattern(variant);
        code_arms.push(quote! { #pattern => #code });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms,)*
                }
            }
        }

        impl #impl_generics ::error::ErrorKind for #name #ty_generics #where_clause {
            fn error_code(&self) -> u32 {
                match self {
                    #(#code_arms,)*
                }
            }

            fn error_message(&self) -> ::std::string::String {
                ::std::string::ToString::to_string(self)
            }
        }
    })
}

/// 读取 `#[error("...")]`，缺省时使用变体名
fn error_message(variant: &Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if attr.path().is_ident("error") {
            let lit: LitStr = attr.parse_args()?;
            return Ok(lit.value());
        }
    }
    Ok(format!("错误: {}", variant.ident))
}

/// 读取 `#[code(N)]`
fn error_code(attrs: &[Attribute]) -> syn::Result<Option<u32>> {
    for attr in attrs {
        if attr.path().is_ident("code") {
            let lit: LitInt = attr.parse_args()?;
            return Ok(Some(lit.base10_parse::<u32>()?));
        }
    }
    Ok(None)
}

fn wildcard_pattern(variant: &Variant) -> TokenStream2 {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Named(_) => quote! { Self::#ident { .. } },
        Fields::Unnamed(_) => quote! { Self::#ident(..) },
        Fields::Unit => quote! { Self::#ident },
    }
}

fn display_arm(variant: &Variant, message: &str) -> TokenStream2 {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Named(fields) => {
            let mut format_str = message.to_string();
            let mut used = Vec::new();
            for field in &fields.named {
                if let Some(field_name) = field.ident.as_ref() {
                    let placeholder = format!("{{{}}}", field_name);
                    if format_str.contains(&placeholder) {
                        format_str = format_str.replace(&placeholder, "{}");
                        used.push(field_name.clone());
                    }
                }
            }
            if used.is_empty() {
                quote! { Self::#ident { .. } => write!(f, #format_str) }
            } else {
                // 同一字段在消息中多次出现时，按出现顺序重复传参
                let args = ordered_args(message, &used);
                quote! { Self::#ident { #(#used,)* .. } => write!(f, #format_str, #(#args),*) }
            }
        }
        Fields::Unnamed(fields) => {
            let bindings: Vec<Ident> = (0..fields.unnamed.len())
                .map(|i| Ident::new(&format!("_field{}", i), Span::call_site()))
                .collect();
            let mut format_str = message.to_string();
            let mut used = Vec::new();
            for (i, binding) in bindings.iter().enumerate() {
                let placeholder = format!("{{{}}}", i);
                if format_str.contains(&placeholder) {
                    format_str = format_str.replace(&placeholder, "{}");
                    used.push((placeholder, binding.clone()));
                }
            }
            if used.is_empty() {
                quote! { Self::#ident(..) => write!(f, #format_str) }
            } else {
                let args = ordered_positional(message, &used);
                quote! { Self::#ident(#(#bindings),*) => write!(f, #format_str, #(#args),*) }
            }
        }
        Fields::Unit => quote! { Self::#ident => write!(f, #message) },
    }
}

/// 按占位符在原始消息中的出现顺序生成参数列表
fn ordered_args(message: &str, fields: &[Ident]) -> Vec<Ident> {
    let mut hits: Vec<(usize, Ident)> = Vec::new();
    for field in fields {
        let placeholder = format!("{{{}}}", field);
        for (pos, _) in message.match_indices(&placeholder) {
            hits.push((pos, field.clone()));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, ident)| ident).collect()
}

fn ordered_positional(message: &str, used: &[(String, Ident)]) -> Vec<Ident> {
    let mut hits: Vec<(usize, Ident)> = Vec::new();
    for (placeholder, binding) in used {
        for (pos, _) in message.match_indices(placeholder.as_str()) {
            hits.push((pos, binding.clone()));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, ident)| ident).collect()
}

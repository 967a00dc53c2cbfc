//! Attribute macros that run an `async fn` as the root task of a fresh
//! `strand_core` runtime.
//!
//! `#[strand_core::test]` uses the virtual clock unless `system_clock` is
//! given; `#[strand_core::main]` uses the system clock unless
//! `virtual_clock` is given. Both accept `turn_budget = N`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ItemFn, Lit, Meta, ReturnType, Token};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

#[derive(Clone, Copy)]
enum MacroKind {
    Test,
    Main,
}

struct Options {
    virtual_clock: bool,
    turn_budget: Option<u64>,
}

impl Options {
    fn defaults(kind: MacroKind) -> Self {
        Self {
            virtual_clock: matches!(kind, MacroKind::Test),
            turn_budget: None,
        }
    }
}

fn parse_options(attr: TokenStream, kind: MacroKind) -> syn::Result<Options> {
    let mut options = Options::defaults(kind);
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;

    for meta in metas {
        match &meta {
            Meta::Path(path) if path.is_ident("system_clock") => options.virtual_clock = false,
            Meta::Path(path) if path.is_ident("virtual_clock") => options.virtual_clock = true,
            Meta::NameValue(pair) if pair.path.is_ident("turn_budget") => {
                let budget = match &pair.value {
                    Expr::Lit(lit) => match &lit.lit {
                        Lit::Int(int) => int.base10_parse::<u64>()?,
                        other => {
                            return Err(syn::Error::new_spanned(
                                other,
                                "turn_budget must be an integer literal",
                            ))
                        }
                    },
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "turn_budget must be an integer literal",
                        ))
                    }
                };
                if budget == 0 {
                    return Err(syn::Error::new_spanned(
                        &pair.value,
                        "turn_budget must be greater than zero",
                    ));
                }
                options.turn_budget = Some(budget);
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `system_clock`, `virtual_clock` or `turn_budget = N`",
                ))
            }
        }
    }

    Ok(options)
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let options = match parse_options(attr, kind) {
        Ok(options) => options,
        Err(error) => return error.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "strand_core attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;
    let runtime = build_runtime(&options);

    let body = match &input.sig.output {
        ReturnType::Default => quote! {
            if let ::std::result::Result::Err(error) = #runtime.block_on(async move {
                #block;
                ::std::result::Result::Ok::<(), ::strand_core::Error>(())
            }) {
                ::std::panic!("root task failed: {}", error);
            }
        },
        ReturnType::Type(_, _) => quote! {
            #runtime.block_on(async move #block)
        },
    };

    let test_attr = match kind {
        MacroKind::Test => quote!(#[::core::prelude::v1::test]),
        MacroKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #body
        }
    }
    .into()
}

fn build_runtime(options: &Options) -> TokenStream2 {
    let clock = if options.virtual_clock {
        quote!(.virtual_clock())
    } else {
        quote!(.system_clock())
    };
    let budget = match options.turn_budget {
        Some(turns) => quote!(.turn_budget(#turns)),
        None => TokenStream2::new(),
    };
    quote! {
        ::strand_core::runtime::Builder::new()
            #clock
            #budget
            .build()
    }
}

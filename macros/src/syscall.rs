/*
 * Copyright 2025 The MOS Authors
 *
 * This file is part of MOS.
 *
 * MOS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * MOS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * MOS. If not, see <https://www.gnu.org/licenses/>.
 */

//! This module implements the macro used to declare a system call.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn};

/// The maximum number of arguments a system call can receive.
const MAX_ARGS: usize = 6;

/// Implementation of the syscall macro.
pub fn syscall(input: TokenStream) -> TokenStream {
	let input = parse_macro_input!(input as ItemFn);

	// Check signature is valid
	if input.sig.constness.is_some() {
		panic!("a system call handler cannot be `const`");
	}
	if !input.sig.generics.params.is_empty() {
		panic!("a system call cannot have generic arguments");
	}
	if input.sig.variadic.is_some() {
		panic!("a system call handler cannot have variadic arguments");
	}
	if input.sig.inputs.len() > MAX_ARGS {
		panic!("too many arguments for the current target (max: {MAX_ARGS})");
	}

	let args_tokens: proc_macro2::TokenStream = input
		.sig
		.inputs
		.iter()
		.enumerate()
		.map(|(i, arg)| match arg {
			FnArg::Typed(typed) => {
				let pat = &typed.pat;
				let ty = &typed.ty;
				quote! {
					let #pat = <#ty as crate::syscall::FromSyscallArg>::from_arg(args[#i]);
				}
			}
			FnArg::Receiver(_) => panic!("a system call handler cannot have a `self` argument"),
		})
		.collect();

	let ident = input.sig.ident;
	let output = input.sig.output;
	let code = input.block;

	let toks = if cfg!(feature = "strace") {
		quote! {
			pub fn #ident(args: &crate::syscall::SyscallArgs) #output {
				#args_tokens
				crate::println!(
					"[strace tid {}] {}{:x?}",
					crate::process::thread::Thread::current().tid,
					stringify!(#ident),
					args
				);
				#code
			}
		}
	} else {
		quote! {
			#[allow(unused_variables)]
			pub fn #ident(args: &crate::syscall::SyscallArgs) #output {
				#args_tokens
				#code
			}
		}
	};
	TokenStream::from(toks)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative macros shared across the workspace.
//!
//! - [`simple_display!`] — map enum variants to fixed display strings
//! - [`builder!`] — test-only builder for a record struct

/// Map enum variants to fixed display strings.
///
/// Unit variants match directly; data-carrying variants take `(..)`.
///
/// ```ignore
/// crate::simple_display! {
///     TaskStatus {
///         Queued => "queued",
///         InProgress => "in_progress",
///     }
/// }
/// ```
#[macro_export]
macro_rules! simple_display {
    ($ty:ty { $( $name:ident $(( $($skip:tt)* ))? => $text:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let text = match self {
                    $( Self::$name $(( $($skip)* ))? => $text, )+
                };
                f.write_str(text)
            }
        }
    };
}

/// Test-only builder for a record struct, gated behind
/// `#[cfg(any(test, feature = "test-support"))]`.
///
/// Three field groups, each with a default:
/// - `into { … }` — setter accepts `impl Into<T>`
/// - `set { … }` — setter takes the field type as-is
/// - `option { … }` — field is `Option<T>`; the setter wraps in `Some`
///
/// ```ignore
/// crate::builder! {
///     pub struct TaskStateBuilder => TaskState {
///         into { task_id: TaskId = "task-1" }
///         set { status: TaskStatus = TaskStatus::Queued }
///         option { failed_step: u32 = None }
///     }
/// }
/// ```
#[macro_export]
macro_rules! builder {
    (
        pub struct $builder:ident => $target:ident {
            $(into { $( $conv:ident : $conv_ty:ty = $conv_default:expr ),* $(,)? })?
            $(set { $( $plain:ident : $plain_ty:ty = $plain_default:expr ),* $(,)? })?
            $(option { $( $maybe:ident : $maybe_ty:ty = $maybe_default:expr ),* $(,)? })?
        }
    ) => {
        #[cfg(any(test, feature = "test-support"))]
        pub struct $builder {
            $($( $conv: $conv_ty, )*)?
            $($( $plain: $plain_ty, )*)?
            $($( $maybe: Option<$maybe_ty>, )*)?
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $builder {
            $($( pub fn $conv(mut self, value: impl Into<$conv_ty>) -> Self {
                self.$conv = value.into();
                self
            } )*)?

            $($( pub fn $plain(mut self, value: $plain_ty) -> Self {
                self.$plain = value;
                self
            } )*)?

            $($( pub fn $maybe(mut self, value: impl Into<$maybe_ty>) -> Self {
                self.$maybe = Some(value.into());
                self
            } )*)?

            pub fn build(self) -> $target {
                $target {
                    $($( $conv: self.$conv, )*)?
                    $($( $plain: self.$plain, )*)?
                    $($( $maybe: self.$maybe, )*)?
                }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl Default for $builder {
            fn default() -> Self {
                Self {
                    $($( $conv: $conv_default.into(), )*)?
                    $($( $plain: $plain_default, )*)?
                    $($( $maybe: $maybe_default, )*)?
                }
            }
        }
    };
}

mod accept;
mod poll;
mod push;

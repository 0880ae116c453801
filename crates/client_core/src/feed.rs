use shared::{
    domain::{PostId, UserId},
    protocol::{PostQuery, PostSummary, VoteSummary, VoteUpdate},
};

#[derive(Debug, Default)]
pub struct PostFeed {
    posts: Vec<PostSummary>,
    visible: bool,
    query: PostQuery,
}

impl PostFeed {
    pub fn posts(&self) -> &[PostSummary] {
        &self.posts
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn get(&self, id: &PostId) -> Option<&PostSummary> {
        self.posts.iter().find(|post| &post.id == id)
    }

    pub fn replace(&mut self, posts: Vec<PostSummary>, query: PostQuery) {
        self.posts = Vec::with_capacity(posts.len());
        for post in posts {
            if self.get(&post.id).is_none() {
                self.posts.push(post);
            }
        }
        self.query = query;
    }

    /// Pushed posts only show up in a visible, unfiltered feed, and never for
    /// their own author, who already got the post from the create call.
    pub fn apply_new_post(&mut self, post: PostSummary, me: Option<&UserId>) -> bool {
        if !self.visible || self.query.is_filtered() || me == Some(&post.user_id) {
            return false;
        }
        self.insert_front(post)
    }

    pub fn insert_own_post(&mut self, post: PostSummary) -> bool {
        self.insert_front(post)
    }

    fn insert_front(&mut self, post: PostSummary) -> bool {
        if self.get(&post.id).is_some() {
            return false;
        }
        self.posts.insert(0, post);
        true
    }

    pub fn remove(&mut self, id: &PostId) -> bool {
        let before = self.posts.len();
        self.posts.retain(|post| &post.id != id);
        self.posts.len() != before
    }

    /// Unknown posts are ignored.
    pub fn apply_vote_update(&mut self, update: &VoteUpdate) -> bool {
        let Some(post) = self.posts.iter_mut().find(|post| post.id == update.post_id) else {
            return false;
        };
        post.upvotes = update.upvotes;
        post.downvotes = update.downvotes;
        true
    }

    pub fn apply_vote_summary(&mut self, post_id: &PostId, summary: &VoteSummary) -> bool {
        let Some(post) = self.posts.iter_mut().find(|post| &post.id == post_id) else {
            return false;
        };
        post.upvotes = summary.upvotes;
        post.downvotes = summary.downvotes;
        post.user_vote = summary.user_vote;
        true
    }

    pub fn clear(&mut self) {
        self.posts.clear();
        self.query = PostQuery::default();
    }
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
